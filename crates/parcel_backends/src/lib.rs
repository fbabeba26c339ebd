pub mod registry;
pub mod signing;
pub mod stager;

pub use registry::{CodeRegistry, InMemoryCodeRegistry, LapsedCode, RegistryError};
pub use signing::{SignatureError, UrlSigner};
pub use stager::{
    FsObjectStager, InMemoryObjectStager, ObjectStager, PutObject, StagerError, StoredObject,
};
