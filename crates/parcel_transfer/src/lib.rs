pub mod error;
pub mod expiry;
pub mod naming;
pub mod package;
pub mod payload;
pub mod pickup;
pub mod wire;

pub use error::ValidationError;
pub use expiry::{ExpireUnit, ExpiryWindow};
pub use naming::{ObjectName, ObjectNaming};
pub use package::{package_entries, PackageError, PackagedArchive};
pub use payload::{validate_text, TransferKind, MAX_TEXT_BYTES};
pub use pickup::{PickupCode, PICKUP_CODE_LEN};
pub use wire::{PickupTicket, SendReceipt, UpdateFileStatusRequest};
