//! Error type shared by every component.

use zmod_shared::ZmodFamily;

use crate::frontend::StatusFlags;

/// Zmod driver error
#[derive(thiserror::Error, Debug)]
pub enum ZmodError {
    // Configuration
    #[error("No calibration data found on the device")]
    NotFound,
    #[error("Expected a {expected:?} pod, found {found:?}")]
    DeviceMismatch {
        expected: ZmodFamily,
        found: ZmodFamily,
    },
    #[error("Unsupported product `{0}`")]
    Unsupported(String),
    #[error("Corrupt calibration record: {0}")]
    CorruptCalibration(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Resources
    #[error("Unable to allocate space for {descriptors} descriptors")]
    AllocationFailed { descriptors: usize },
    #[error("Buffer of {len} samples cannot hold {needed}")]
    BufferTooSmall { len: usize, needed: usize },

    // Caller contract
    #[error("Transfer needs {needed} descriptors but only {free} are free")]
    InsufficientDescriptors { needed: usize, free: usize },
    #[error("Cyclic transfer of {len_bytes} bytes is not a whole number of {block_bytes}-byte blocks")]
    MisalignedBuffer { len_bytes: usize, block_bytes: usize },
    #[error("Transfer completion is undefined for a cyclic ring")]
    CyclicModeQuery,
    #[error("Descriptor ring has not been created")]
    RingNotCreated,
    #[error("Capture has not been armed")]
    NotArmed,
    #[error("Trigger has not completed yet")]
    TriggerPending,
    #[error("No waveform loaded")]
    NoWaveform,

    // Hardware state
    #[error("Front end reported a configuration error ({0:?})")]
    ConfigError(StatusFlags),
    #[error("Front end dropped samples ({0:?})")]
    DataOverflow(StatusFlags),
    #[error("Register 0x{offset:02x} did not reach the expected state after {polls} polls")]
    RegisterTimeout { offset: usize, polls: usize },
    #[error("Trigger not detected before the deadline")]
    TriggerTimeout,
    #[error("Shared buffer lock poisoned")]
    Poisoned,
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    // Completeness
    #[error("No end-of-frame descriptor found; capture is unusable")]
    CaptureIncomplete,
}
