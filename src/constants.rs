/// CAS（Compare-And-Swap）操作最大重试次数
pub const MAX_CAS_RETRIES: u32 = 20;

/// 路径最大长度（字节），超出部分截断
pub const MAX_PATH_LEN: usize = 255;

/// 每批次最多处理的队列条目数（含种子条目）
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// 队列租约时长（秒）
pub const DEFAULT_LEASE_SECS: u64 = 60;

/// 单次 worker 触发的最长排空时间（秒）
pub const DEFAULT_DRAIN_SECS: u64 = 15;

/// 默认采样率（1/N）
pub const DEFAULT_SAMPLING_RATE: u32 = 3;

/// 默认数据保留天数
pub const DEFAULT_RETENTION_DAYS: u32 = 365;

/// 数据保留天数上限（约 100 年），同时限制 max 报表的窗口长度
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// 清理被排除路径时每批删除的路径数
pub const DELETE_BATCH_SIZE: usize = 500;

/// 清理预览最多列出的路径数
pub const PRUNE_PREVIEW_LIMIT: usize = 200;

/// 报表允许的时间段（天）；0 表示使用保留天数
pub const ALLOWED_PERIODS: &[u32] = &[0, 7, 30, 90];

/// 报表默认时间段（天）
pub const DEFAULT_PERIOD: u32 = 7;

/// 报表允许的 Top-N 取值
pub const ALLOWED_TOP: &[usize] = &[30, 50, 100, 300];

/// 报表默认 Top-N
pub const DEFAULT_TOP: usize = 30;

/// 报表每页行数
pub const DEFAULT_REPORT_PAGE_SIZE: u64 = 25;

/// 报表每页最大行数
pub const MAX_REPORT_PAGE_SIZE: u64 = 300;

/// 视为静态图片资源的扩展名
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "avif", "bmp", "gif", "ico", "jpeg", "jpg", "png", "svg", "webp",
];

/// 匿名访客的隐式角色
pub const ROLE_ANONYMOUS: &str = "anonymous";

/// 已登录访客的隐式角色
pub const ROLE_AUTHENTICATED: &str = "authenticated";
