//! Toast presentation: one transient on-screen alert for the newest unread
//! notification.
//!
//! - [`controller`] - the `Hidden / Showing / Dismissing` state machine
//! - [`style`] - color and icon selection by notification kind
//! - [`driver`] - tokio task running the controller against the store

pub mod controller;
pub mod driver;
pub mod style;

pub use controller::{ToastController, ToastEffect, ToastFrame, ToastState, ToastTimings};
pub use driver::{ToastDriver, ToastView};
pub use style::{ToastStyle, ToastTone};
