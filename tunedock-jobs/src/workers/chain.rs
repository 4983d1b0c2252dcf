//! Provider fallback chain
//!
//! A download job carries every known source for its track. The chain
//! tries them in order and stops at the first success; the job only fails
//! once all sources are exhausted, and the aggregated error names each
//! provider tried and why it failed.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::models::{Provider, SourceCandidate};
use crate::providers::ProviderRegistry;

/// One candidate's recorded failure
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub provider: Provider,
    pub locator: String,
    pub reason: String,
}

/// Successful fetch plus the failures that preceded it
#[derive(Debug)]
pub struct ChainOutcome {
    /// Provider that produced the audio
    pub provider: Provider,
    /// Fetched file in the job's work directory
    pub fetched: PathBuf,
    /// Candidates that failed before the winning one
    pub failures: Vec<SourceFailure>,
}

/// All candidates exhausted
#[derive(Debug)]
pub struct ChainExhausted {
    pub failures: Vec<SourceFailure>,
}

impl std::fmt::Display for ChainExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let attempts: Vec<String> = self
            .failures
            .iter()
            .map(|fail| format!("{} ({}): {}", fail.provider, fail.locator, fail.reason))
            .collect();
        write!(
            f,
            "no audio could be downloaded from any source; tried {}: {}",
            self.failures.len(),
            attempts.join("; ")
        )
    }
}

impl std::error::Error for ChainExhausted {}

/// Reorder candidates so the preferred provider's entries come first
///
/// The reorder is stable: preferred candidates keep their relative order,
/// as do the rest. A preferred provider absent from the list changes
/// nothing.
pub fn order_candidates(
    candidates: &[SourceCandidate],
    preferred: Option<Provider>,
) -> Vec<SourceCandidate> {
    let Some(preferred) = preferred else {
        return candidates.to_vec();
    };

    let (first, rest): (Vec<SourceCandidate>, Vec<SourceCandidate>) = candidates
        .iter()
        .cloned()
        .partition(|c| c.provider == preferred);

    first.into_iter().chain(rest).collect()
}

/// Try each candidate in order, stopping at the first success
pub async fn fetch_first_success(
    registry: &ProviderRegistry,
    candidates: &[SourceCandidate],
    work_dir: &Path,
) -> Result<ChainOutcome, ChainExhausted> {
    let mut failures = Vec::new();

    for candidate in candidates {
        let Some(source) = registry.get(candidate.provider) else {
            tracing::warn!(provider = %candidate.provider, "No source configured for provider");
            failures.push(SourceFailure {
                provider: candidate.provider,
                locator: candidate.locator.clone(),
                reason: "provider not configured".to_string(),
            });
            continue;
        };

        tracing::info!(
            provider = %candidate.provider,
            locator = %candidate.locator,
            "Trying candidate source"
        );

        match source.fetch(&candidate.locator, work_dir).await {
            Ok(fetched) => {
                tracing::info!(
                    provider = %candidate.provider,
                    file = %fetched.display(),
                    failed_before = failures.len(),
                    "Candidate source succeeded"
                );
                return Ok(ChainOutcome {
                    provider: candidate.provider,
                    fetched,
                    failures,
                });
            }
            Err(e) => {
                tracing::warn!(
                    provider = %candidate.provider,
                    locator = %candidate.locator,
                    error = %e,
                    "Candidate source failed, trying next"
                );
                failures.push(SourceFailure {
                    provider: candidate.provider,
                    locator: candidate.locator.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Err(ChainExhausted { failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AudioSource, SourceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted source: either always fails or always produces a file,
    /// recording every call.
    struct ScriptedSource {
        provider: Provider,
        succeed: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AudioSource for ScriptedSource {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn fetch(&self, _locator: &str, work_dir: &Path) -> Result<PathBuf, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                let path = work_dir.join(format!("{}.m4a", self.provider));
                std::fs::write(&path, b"audio")?;
                Ok(path)
            } else {
                Err(SourceError::OutputMissing("scripted"))
            }
        }
    }

    fn candidate(provider: Provider) -> SourceCandidate {
        SourceCandidate {
            provider,
            locator: format!("https://example.com/{}", provider),
        }
    }

    fn registry(
        entries: &[(Provider, bool)],
    ) -> (ProviderRegistry, Vec<Arc<AtomicUsize>>) {
        let mut counters = Vec::new();
        let sources: Vec<Arc<dyn AudioSource>> = entries
            .iter()
            .map(|(provider, succeed)| {
                let calls = Arc::new(AtomicUsize::new(0));
                counters.push(calls.clone());
                Arc::new(ScriptedSource {
                    provider: *provider,
                    succeed: *succeed,
                    calls,
                }) as Arc<dyn AudioSource>
            })
            .collect();
        (ProviderRegistry::from_sources(sources), counters)
    }

    #[test]
    fn test_order_without_preference_is_unchanged() {
        let candidates = vec![candidate(Provider::Freyr), candidate(Provider::YtDlp)];
        assert_eq!(order_candidates(&candidates, None), candidates);
    }

    #[test]
    fn test_preferred_provider_moves_first() {
        let candidates = vec![
            candidate(Provider::Freyr),
            candidate(Provider::Spotdl),
            candidate(Provider::YtDlp),
        ];

        let ordered = order_candidates(&candidates, Some(Provider::Spotdl));
        assert_eq!(
            ordered.iter().map(|c| c.provider).collect::<Vec<_>>(),
            vec![Provider::Spotdl, Provider::Freyr, Provider::YtDlp]
        );
    }

    #[test]
    fn test_absent_preferred_provider_is_harmless() {
        let candidates = vec![candidate(Provider::Freyr), candidate(Provider::YtDlp)];
        assert_eq!(
            order_candidates(&candidates, Some(Provider::Scdl)),
            candidates
        );
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_success_and_keeps_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (registry, counters) = registry(&[
            (Provider::Freyr, false),
            (Provider::Spotdl, false),
            (Provider::YtDlp, true),
            (Provider::Scdl, true),
        ]);

        let candidates = vec![
            candidate(Provider::Freyr),
            candidate(Provider::Spotdl),
            candidate(Provider::YtDlp),
            candidate(Provider::Scdl),
        ];

        let outcome = fetch_first_success(&registry, &candidates, dir.path())
            .await
            .expect("chain succeeds");

        assert_eq!(outcome.provider, Provider::YtDlp);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].provider, Provider::Freyr);
        assert_eq!(outcome.failures[1].provider, Provider::Spotdl);
        // The candidate after the winner was never tried
        assert_eq!(counters[3].load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_chain_aggregates_every_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (registry, _) = registry(&[(Provider::Freyr, false), (Provider::YtDlp, false)]);

        let candidates = vec![candidate(Provider::Freyr), candidate(Provider::YtDlp)];
        let err = fetch_first_success(&registry, &candidates, dir.path())
            .await
            .expect_err("chain exhausts");

        assert_eq!(err.failures.len(), 2);
        let message = err.to_string();
        assert!(message.contains("freyr"));
        assert!(message.contains("yt-dlp"));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_counts_as_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (registry, _) = registry(&[(Provider::YtDlp, true)]);

        let candidates = vec![candidate(Provider::Scdl), candidate(Provider::YtDlp)];
        let outcome = fetch_first_success(&registry, &candidates, dir.path())
            .await
            .expect("falls through to configured provider");

        assert_eq!(outcome.provider, Provider::YtDlp);
        assert_eq!(outcome.failures[0].reason, "provider not configured");
    }
}
