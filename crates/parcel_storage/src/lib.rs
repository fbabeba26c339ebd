mod repository;

pub use repository::{
    start_of_utc_day, NewTransferRecord, SqliteTransferStore, StorageConfig, TransferRecord,
    TransferRecordStore,
};
