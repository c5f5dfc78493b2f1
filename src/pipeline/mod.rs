mod driver;
mod model;
mod phase;
mod stages;
mod structured;

pub use driver::Driver;
pub use model::{
    Cut, GenerateRequest, ImagePrompt, PipelineState, Provenance, QaStatus, QaVerdict,
    RenderedImage, RetryLedger, Storyboard,
};
pub use phase::Phase;
