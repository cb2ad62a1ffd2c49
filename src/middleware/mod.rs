pub mod page_view;
pub mod request_id;
