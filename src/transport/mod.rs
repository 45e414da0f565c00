//! Transport clients used by steps: HTTP, Kafka, database and UI

pub mod db;
pub mod http;
pub mod kafka;
pub mod schema;
pub mod ui;

pub use db::{DbBackend, DbClient, DbParam, Row};
pub use http::{HttpClient, HttpResponse, RequestOptions};
pub use kafka::{KafkaBackend, KafkaClient, KafkaMessage, KafkaPayload};
pub use schema::Schema;
pub use ui::{HeadlessDriver, UiDriver};
