use std::env;
use std::sync::OnceLock;

static FISSION_WORKERS: OnceLock<Option<usize>> = OnceLock::new();
static FISSION_BATCH_SIZE: OnceLock<Option<usize>> = OnceLock::new();

fn parse_positive(value: &str) -> Option<usize> {
    value.trim().parse().ok().filter(|parsed| *parsed > 0)
}

pub(crate) fn default_workers() -> Option<usize> {
    *FISSION_WORKERS.get_or_init(|| match env::var("FISSION_WORKERS") {
        Ok(value) if !value.trim().is_empty() => parse_positive(&value),
        _ => None,
    })
}

pub(crate) fn default_batch_size() -> Option<usize> {
    *FISSION_BATCH_SIZE.get_or_init(|| match env::var("FISSION_BATCH_SIZE") {
        Ok(value) if !value.trim().is_empty() => parse_positive(&value),
        _ => None,
    })
}
