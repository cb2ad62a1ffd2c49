pub const VIEW_QUEUE: &str = "view_queue";
pub const VIEW_QUEUE_LEASES: &str = "view_queue_leases";
pub const PAGE_VIEWS_DAILY: &str = "page_views_daily";
pub const META: &str = "meta";
