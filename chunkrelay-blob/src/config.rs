use std::time::Duration;

use crate::store::ContentSettings;

/// Configuration for chunked uploads
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// Rules applied to every incoming chunk
    pub upload_rules: UploadRules,

    /// Content metadata stamped on every committed object
    pub content: ContentSettings,

    /// `Collecting` sessions idle longer than this are swept with their blocks
    pub session_ttl: Duration,

    /// How long a finalized session is kept to answer duplicate final chunks
    pub finalized_retention: Duration,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            upload_rules: UploadRules::default(),
            content: ContentSettings::csv_utf8(),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            finalized_retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Rules for chunk uploads
#[derive(Debug, Clone)]
pub struct UploadRules {
    /// Digit width of the zero-padded chunk number inside block names.
    /// `totalChunks` must stay below `10^block_digits`.
    pub block_digits: u32,

    /// Upper bound for one chunk's body
    pub max_chunk_bytes: u64,
}

impl Default for UploadRules {
    fn default() -> Self {
        Self {
            block_digits: 8,
            max_chunk_bytes: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl BlobConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_upload_rules(mut self, rules: UploadRules) -> Self {
        self.upload_rules = rules;
        self
    }

    pub fn with_content(mut self, content: ContentSettings) -> Self {
        self.content = content;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_finalized_retention(mut self, retention: Duration) -> Self {
        self.finalized_retention = retention;
        self
    }
}

impl UploadRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_digits(mut self, digits: u32) -> Self {
        self.block_digits = digits;
        self
    }

    pub fn with_max_chunk_bytes(mut self, bytes: u64) -> Self {
        self.max_chunk_bytes = bytes;
        self
    }
}
