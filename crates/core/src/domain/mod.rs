pub mod checkpoint;
pub mod event;
pub mod intent;
pub mod thread;
