pub mod client;
pub mod company_settings;
pub mod growatt;
pub mod invoice;
pub mod maintenance;
pub mod notification;
pub mod order;
pub mod product;
pub mod technician;
