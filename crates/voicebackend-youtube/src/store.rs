//! In-memory job registry: FIFO insertion order, TTL eviction of terminal
//! jobs, and a hard history cap, all behind a single exclusive lock.

use crate::job::{Job, JobView, Status};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use voicebackend_common::{int_env, monotonic_secs};

struct StoreState {
    jobs: HashMap<String, Arc<Mutex<Job>>>,
    order: VecDeque<String>,
}

pub struct JobStore {
    state: Mutex<StoreState>,
    ttl_seconds: f64,
    history_max: usize,
}

impl JobStore {
    pub fn new(ttl_seconds: f64, history_max: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                jobs: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl_seconds,
            history_max,
        }
    }

    /// Build from environment, clamping to sane bounds:
    /// `ST_YOUTUBE_JOB_TTL_SECONDS` [300..604800]=86400,
    /// `ST_YOUTUBE_JOB_HISTORY_MAX` [10..5000]=100.
    pub fn from_env() -> Self {
        let ttl = int_env("ST_YOUTUBE_JOB_TTL_SECONDS", 86_400, 300, 604_800) as f64;
        let history_max = int_env("ST_YOUTUBE_JOB_HISTORY_MAX", 100, 10, 5000) as usize;
        Self::new(ttl, history_max)
    }

    pub fn insert(&self, job: Job) -> Arc<Mutex<Job>> {
        let mut state = self.state.lock();
        self.evict_locked(&mut state);
        let job_id = job.job_id.clone();
        let handle = Arc::new(Mutex::new(job));
        state.jobs.insert(job_id.clone(), handle.clone());
        state.order.push_back(job_id);
        handle
    }

    pub fn get_handle(&self, job_id: &str) -> Option<Arc<Mutex<Job>>> {
        let mut state = self.state.lock();
        self.evict_locked(&mut state);
        state.jobs.get(job_id).cloned()
    }

    pub fn get_view(&self, job_id: &str) -> Option<JobView> {
        self.get_handle(job_id).map(|handle| handle.lock().to_view())
    }

    pub fn len(&self) -> usize {
        let mut state = self.state.lock();
        self.evict_locked(&mut state);
        state.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop terminal jobs whose `now - updatedTs > ttlSeconds`, then while
    /// the FIFO exceeds `historyMax`, drop the oldest entry if (and only
    /// if) it is terminal. An active job is never evicted.
    fn evict_locked(&self, state: &mut StoreState) {
        let now = monotonic_secs();
        let expired: Vec<String> = state
            .jobs
            .iter()
            .filter_map(|(id, handle)| {
                let job = handle.lock();
                if job.status.is_terminal() && now - job.updated_ts > self.ttl_seconds {
                    Some(id.clone())
                } else {
                    None
                }
            })
            .collect();
        for id in expired {
            state.jobs.remove(&id);
        }
        state.order.retain(|id| state.jobs.contains_key(id));

        while state.order.len() > self.history_max {
            let Some(oldest_id) = state.order.front().cloned() else {
                break;
            };
            let is_terminal = state
                .jobs
                .get(&oldest_id)
                .map(|h| h.lock().status.is_terminal())
                .unwrap_or(true);
            if !is_terminal {
                break;
            }
            state.order.pop_front();
            state.jobs.remove(&oldest_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{generate_job_id, DraftTone, GenerationConfig, JobInputs, Stage};

    fn make_job() -> Job {
        Job::new(
            generate_job_id(),
            JobInputs {
                video_url: "https://www.youtube.com/watch?v=AAAAAAAAAAA".to_string(),
                language_hint: "en".to_string(),
                keep_audio: false,
                asr_engine: "faster-whisper".to_string(),
                asr_model: "base".to_string(),
                generation_config: GenerationConfig::default(),
                draft_tone: DraftTone::Professional,
            },
        )
    }

    #[test]
    fn insert_and_get_round_trips() {
        let store = JobStore::new(86_400.0, 100);
        let job = make_job();
        let id = job.job_id.clone();
        store.insert(job);
        let view = store.get_view(&id).unwrap();
        assert_eq!(view.job_id, id);
    }

    #[test]
    fn history_cap_evicts_only_terminal_jobs() {
        let store = JobStore::new(86_400.0, 2);
        let mut job_a = make_job();
        job_a.finish_done("done".to_string());
        let id_a = job_a.job_id.clone();
        store.insert(job_a);

        let job_b = make_job();
        let id_b = job_b.job_id.clone();
        store.insert(job_b);
        store.get_handle(&id_b).unwrap().lock().advance(Stage::Resolving, 0.05);

        let job_c = make_job();
        store.insert(job_c);

        assert!(store.get_view(&id_a).is_none(), "terminal job should be evicted first");
        assert!(store.get_view(&id_b).is_some(), "active job must never be evicted");
        assert!(store.len() <= 3);
    }

    #[test]
    fn ttl_eviction_drops_old_terminal_jobs() {
        let store = JobStore::new(0.0, 100);
        let mut job = make_job();
        job.finish_done("done".to_string());
        let id = job.job_id.clone();
        store.insert(job);
        assert!(store.get_view(&id).is_none());
    }
}
