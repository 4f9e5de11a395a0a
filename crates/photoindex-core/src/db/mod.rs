//! Photoindex 数据库模块
//!
//! 包含数据库连接管理、数据访问层和按相册提交的变更事务

pub mod schema;
pub mod connection;
pub mod mutation;
pub mod root_dao;
pub mod album_dao;
pub mod media_dao;
pub mod derivative_dao;
pub mod share_dao;
pub mod scan_dao;

pub use connection::{Database, DatabaseStats};
pub use media_dao::MediaSnapshot;
pub use mutation::{ApplySummary, Mutation};
