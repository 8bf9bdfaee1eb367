/// Names shared by the drivers, the CLI defaults and the schemas.

// Driver names as they appear in `source` and in raw keys
pub const FILE_SOURCE: &str = "file";
pub const HTTP_SOURCE: &str = "ingestor-http";
pub const STREAM_SOURCE: &str = "ingestor-stream";

// Outbound ingest topics, one per origin
pub const FILE_TOPIC: &str = "ingest.file.v1";
pub const HTTP_TOPIC: &str = "ingest.http.v1";
pub const STREAM_TOPIC: &str = "ingest.stream.v1";

// Inbound topic for the stream relay
pub const SOURCE_POSTS_TOPIC: &str = "source.posts.v1";

pub const RAW_BUCKET: &str = "raw";

pub const SCHEMA_VERSION_V1: &str = "1.0.0";

// Schema documents expected in the schema directory
pub const ENVELOPE_SCHEMA_FILE: &str = "envelope.v1.schema.json";
pub const FILE_SCHEMA_FILE: &str = "ingest-file.v1.schema.json";
pub const HTTP_SCHEMA_FILE: &str = "ingest-http.v1.schema.json";
pub const STREAM_SCHEMA_FILE: &str = "ingest-stream.v1.schema.json";

pub const JSON_CONTENT_TYPE: &str = "application/json";
