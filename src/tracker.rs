mod binding;
mod binding_state;
mod camera;
mod events;
mod origin;
mod registry;
mod target;

pub use binding::{AttachmentBinding, BindingConfig, FrameContext, PlaybackMode, SceneView};
pub use binding_state::BindingState;
pub use camera::{CameraPose, CameraPoseResolver, ScreenOrientation};
pub use events::{ChannelSink, EventBus, PoseEvent, PoseEventSink, RecordingSink};
pub use origin::Origin;
pub use registry::{PendingRegistration, RegistrationOutcome, TargetRegistry};
pub use target::{TargetId, TargetKey, TargetKind, TargetOption, TargetOptions, TargetSnapshot};
