//! The static voice answer sent back for every inline query.

pub const VOICE_RESULT_ID: &str = "voice-1";
pub const VOICE_TITLE: &str = "Example Voice";
pub const VOICE_PATH: &str = "/greeting.ogg";

/// Answers are never cached by the platform.
pub const CACHE_TIME_SECS: u32 = 0;

/// One selectable voice entry in an inline answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceResult {
    pub id: String,
    /// Public URL of an OGG/Opus file
    pub voice_url: String,
    pub title: String,
}

/// An `answerInlineQuery` call, independent of the platform client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineAnswer {
    pub query_id: String,
    pub results: Vec<VoiceResult>,
    pub cache_time: u32,
}

/// Build the greeting result. The URL is the base URL with the file path appended as-is.
pub fn greeting(base_url: &str) -> VoiceResult {
    VoiceResult {
        id: VOICE_RESULT_ID.to_string(),
        voice_url: format!("{}{}", base_url, VOICE_PATH),
        title: VOICE_TITLE.to_string(),
    }
}

/// Build the answer for one inline query.
pub fn answer_for(query_id: &str, base_url: &str) -> InlineAnswer {
    InlineAnswer {
        query_id: query_id.to_string(),
        results: vec![greeting(base_url)],
        cache_time: CACHE_TIME_SECS,
    }
}
