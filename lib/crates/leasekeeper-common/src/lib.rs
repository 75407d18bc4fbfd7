pub mod panel;
pub mod types;

pub use panel::{PanelLocation, PanelState};
pub use types::*;
