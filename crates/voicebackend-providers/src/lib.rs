//! Speech-to-text and text-to-speech provider contracts: readiness probing,
//! manifest verification, engine normalization, and the provider registry
//! that the HTTP surface dispatches through.

pub mod bench;
pub mod normalize;
pub mod probe;
pub mod registry;
pub mod stt;
pub mod tts;

pub use bench::{audio_seconds_from_wav, current_working_set_mb};
pub use normalize::{normalize_stt_engine, normalize_stt_language, normalize_tts_engine, resolve_stt_model_id};
pub use probe::{build_engine_status, EngineStatus, EngineStatusDetails, FileProbeResult, InitProbeResult, ProbeState};
pub use registry::{ProviderRegistry, RuntimeConfig};
pub use stt::SttProvider;
pub use tts::TtsProvider;
