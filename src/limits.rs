//! Hard limits applied at the engine and tenant boundaries.

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_ENTRIES_PER_TENANT: usize = 1_000_000;
/// Active entries one resource may hold on a single weekday.
pub const MAX_ENTRIES_PER_BUCKET: usize = 512;
pub const MAX_BATCH_SIZE: usize = 64;

pub const MAX_REF_LEN: usize = 128;
pub const MAX_ROOM_LEN: usize = 64;
pub const MAX_NOTES_LEN: usize = 4096;
