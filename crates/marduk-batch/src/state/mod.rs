//! State caches consulted while recording.
//!
//! Both caches exist to keep redundant work out of the executed command
//! stream: the attachment tracker deduplicates binds, the uniform state
//! deduplicates value uploads.

mod attachment;
mod uniform;

pub use attachment::{AttachmentState, SavedAttachments, TextureBinding};
pub use uniform::{UniformFlags, UniformFormat, UniformInfo, UniformState};
