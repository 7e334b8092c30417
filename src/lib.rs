//! Letter courier
//!
//! Ships batches of letter PDFs (zipped), print-job flat files (concatenated)
//! and the API's notification flat files from the object store to the print
//! provider's SFTP drop, then tells downstream which references were sent or
//! failed.
//!
//! Every external dependency sits behind a trait with an in-memory and a
//! seeded fault-injecting implementation, so the whole delivery path can be
//! exercised deterministically (see `delivery::dst`).

pub mod archive;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod fanout;
pub mod naming;
pub mod observability;
pub mod queue;
pub mod sim;
pub mod store;
pub mod tasks;
pub mod transfer;

pub use config::{ConfigError, CourierConfig};
pub use delivery::{
    ApiFileRequest, Courier, DeliveryError, DeliveryOutcome, DeliveryReport, JobRequest,
    LetterRequest,
};
pub use queue::{TaskMessage, TaskQueue};
pub use store::{BlobStore, StoreError};
pub use tasks::{TaskError, Worker};
pub use transfer::{Transfer, TransferError};
