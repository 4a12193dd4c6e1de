//! Repository modules. Each adds methods to `SyncStore` via `impl SyncStore`.

pub mod findings;
pub mod locks;
pub mod participation;
pub mod records;
pub mod runs;
pub mod users;
