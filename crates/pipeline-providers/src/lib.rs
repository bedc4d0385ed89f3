//! External model collaborators the pipeline orchestrates but does not
//! implement itself: the image-to-video motion model and the headless map
//! renderer.

pub mod error;
pub mod map;
pub mod motion;

pub use error::{ProviderError, ProviderResult};
pub use map::{produce as produce_map_clip, HeadlessMapClipProvider, MapClipProvider, MapProviderConfig};
pub use motion::{
    generate as generate_motion_clip, HostedMotionClipProvider, MotionClipProvider, MotionProviderConfig,
    TaskResult, TaskStatus,
};
