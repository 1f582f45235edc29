//! Pull tag identifiers. Same id space as the daemon's atom ids.

pub const WIFI_BYTES_TRANSFER: i32 = 10000;
pub const WIFI_BYTES_TRANSFER_BY_FG_BG: i32 = 10001;
pub const MOBILE_BYTES_TRANSFER: i32 = 10002;
pub const MOBILE_BYTES_TRANSFER_BY_FG_BG: i32 = 10003;
pub const KERNEL_WAKELOCK: i32 = 10004;
pub const BLUETOOTH_BYTES_TRANSFER: i32 = 10006;
pub const BLUETOOTH_ACTIVITY_INFO: i32 = 10007;
pub const CPU_TIME_PER_FREQ: i32 = 10008;
pub const CPU_TIME_PER_UID: i32 = 10009;
pub const CPU_TIME_PER_UID_FREQ: i32 = 10010;
pub const WIFI_ACTIVITY_INFO: i32 = 10011;
pub const MODEM_ACTIVITY_INFO: i32 = 10012;
pub const PROCESS_MEMORY_STATE: i32 = 10013;
pub const SYSTEM_ELAPSED_REALTIME: i32 = 10014;
pub const SYSTEM_UPTIME: i32 = 10015;
pub const CPU_ACTIVE_TIME: i32 = 10016;
pub const CPU_CLUSTER_TIME: i32 = 10017;
pub const BINDER_CALLS: i32 = 10022;
pub const BINDER_CALLS_EXCEPTIONS: i32 = 10023;
pub const LOOPER_STATS: i32 = 10024;
pub const DISK_STATS: i32 = 10025;
pub const DIRECTORY_USAGE: i32 = 10026;
pub const APP_SIZE: i32 = 10027;
pub const CATEGORY_SIZE: i32 = 10028;
pub const PROC_STATS: i32 = 10029;
pub const NUM_FINGERPRINTS: i32 = 10031;
pub const DISK_IO: i32 = 10032;
pub const POWER_PROFILE: i32 = 10033;

/// Values of the directory field in DIRECTORY_USAGE records
pub mod directory {
    pub const DATA: i32 = 1;
    pub const CACHE: i32 = 2;
    pub const SYSTEM: i32 = 3;
}

/// Values of the category field in CATEGORY_SIZE records
pub mod category {
    pub const APP_SIZE: i32 = 1;
    pub const APP_DATA_SIZE: i32 = 2;
    pub const APP_CACHE_SIZE: i32 = 3;
    pub const PHOTOS: i32 = 4;
    pub const VIDEOS: i32 = 5;
    pub const AUDIO: i32 = 6;
    pub const DOWNLOADS: i32 = 7;
    pub const SYSTEM: i32 = 8;
    pub const OTHER: i32 = 9;
}
