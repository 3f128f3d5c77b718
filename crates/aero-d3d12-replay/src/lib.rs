//! Direct3D 12 / DXGI capture replay engine.
//!
//! The engine sits between a decoded call stream and a native driver. It keeps captured object
//! identities alive across the replay ([`object_table`]), rewrites captured GPU virtual addresses
//! ([`gpu_va`]), routes captured CPU writes into mapped memory ([`memory`], [`resource`]),
//! reproduces the capture-time fence ordering between queues and the CPU ([`sync`]) and backs
//! swap chains with replay windows ([`swapchain`]).
//!
//! [`Dx12ReplayConsumer`] owns all of that state. [`software::SoftwareDriver`] and
//! [`window::HeadlessWindowFactory`] provide an in-memory driver and window system so whole
//! captures can be replayed headless.

pub mod consumer;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod external;
pub mod gpu_va;
pub mod handles;
pub mod hresult;
pub mod memory;
pub mod object_table;
pub mod options;
pub mod resource;
pub mod software;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use consumer::{Dx12ReplayConsumer, FenceState};
pub use dispatch::{replay_software, ReplayCall, ReplayScript, ReplaySummary};
pub use driver::Driver;
pub use error::ReplayError;
pub use handles::{CaptureId, EventHandle, NativeHandle, NativeWindowHandle};
pub use hresult::HResult;
pub use options::ReplayOptions;
