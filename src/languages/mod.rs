//! Bundled implementations
//!
//! `PJL` is the control layer; the page-description languages spool each job's
//! bytes to the output device.

mod pcl;
mod pclxl;
mod pdf;
mod pjl;
mod postscript;
mod spool;

pub use pcl::Pcl;
pub use pclxl::PclXl;
pub use pdf::Pdf;
pub use pjl::Pjl;
pub use postscript::PostScript;

use crate::dispatch::error::DispatchResult;
use crate::dispatch::registry::Registry;

/// Registry with PJL in slot 0 followed by PCL, PCLXL, POSTSCRIPT and PDF
///
/// PCL sits in slot 1, so streams nothing recognises are treated as PCL.
pub fn standard_registry() -> DispatchResult<Registry> {
    Registry::builder()
        .control(Pjl::new())
        .register(Pcl::new())
        .register(PclXl::new())
        .register(PostScript::new())
        .register(Pdf::new())
        .build()
}
