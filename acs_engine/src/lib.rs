//! Tick-driven interpreter for compiled map scripts.
//!
//! [`Vm`] owns the loaded image and every live script instance; the game
//! reaches it through [`Vm::tick`] and the start/suspend/terminate requests,
//! and the VM reaches back into the game through [`ScriptHost`].

pub mod config;
pub mod deferred;
pub mod dispatch;
pub mod host;
pub mod host_log;
pub mod instance;
pub mod scheduler;
pub mod stack;
pub mod vars;
pub mod vm;

pub use config::VmConfig;
pub use deferred::{ActionKind, DeferredAction, DeferredQueue};
pub use dispatch::{Fault, Step};
pub use host::{GameType, PrintStyle, ScriptHost, SoundOrigin, Surface};
pub use host_log::{HostEvent, RecordingHost};
pub use instance::{ActorId, LineId, LineSide, ScriptState, ScriptStatus, Trigger};
pub use vm::{Outcome, RequestError, Vm, VmSnapshot};
