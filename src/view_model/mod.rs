//! State derived for display from the provider, the snapshot builder and the
//! progress hub.
//!
//! - `ListViewModel`: the current snapshot, rebuilt on every list, filter or
//!   settings change
//! - `WindowViewModel`: scan status, badge and bulk-update gating
//! - `RowViewModel`: the action button of one application row

mod list;
mod row;
mod window;

pub use list::ListViewModel;
pub use row::{RowAction, RowViewModel};
pub use window::{ScanEvent, WindowViewModel};
