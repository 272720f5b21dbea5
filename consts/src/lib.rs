#![no_std]

/// Version byte carried in every frame header on the gateway link.
pub const PROTOCOL_VERSION: u8 = 1;

/// Destination address matching every device.
pub const BROADCAST_ADDRESS: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Reserved address of the gateway itself; devices address their
/// notifications to it.
pub const GATEWAY_ADDRESS: u64 = 0x0000_0000_0000_0000;

/// Maximum size of a frame on the radio link, header included.
/// The radio hands us at most one PDU of this size per receive event.
pub const MAX_FRAME_SIZE: usize = 255;

/// Maximum number of firmware bytes carried by one OTA chunk.
/// Chunk `index * OTA_CHUNK_SIZE` is also the flash offset of the chunk,
/// so this value is baked into every image transfer.
pub const OTA_CHUNK_SIZE: usize = 128;

/// Length of the SHA-256 digest used for image integrity.
pub const OTA_HASH_SIZE: usize = 32;

/// Size of one erasable flash page.
pub const FLASH_PAGE_SIZE: u32 = 4096;

/// First flash address of the application image. Everything below this
/// address belongs to the trusted management partition.
pub const IMAGE_BASE_ADDRESS: u32 = 0x4000;

/// Largest application image the device accepts.
pub const IMAGE_MAX_SIZE: u32 = 0x3C000;

/// Maximum payload bytes in a log event notification.
pub const MAX_LOG_DATA: usize = 127;

/// Maximum payload bytes in an application message notification.
pub const MAX_MESSAGE_DATA: usize = 127;

/// Maximum application PDU relayed between the radio and the running
/// application firmware (frame minus header and opcode).
pub const MAX_APP_PDU: usize = MAX_FRAME_SIZE - 19;

/// Period of the supervisor watchdog in milliseconds. Reloaded once per
/// management-loop iteration; deliberately left to expire on a stop request.
pub const SUPERVISOR_WDT_PERIOD_MS: u32 = 1000;

/// Period of the application watchdog in milliseconds. The application must
/// issue a reload system call at least this often while it executes.
pub const APP_WDT_PERIOD_MS: u32 = 1000;

/// Spin iterations before a mailbox lock acquisition gives up.
pub const LOCK_SPIN_BUDGET: u32 = 1_000_000;

/// Spin iterations before a mailbox service call stops waiting for the
/// peer's acknowledgment.
pub const ACK_SPIN_BUDGET: u32 = 10_000_000;
