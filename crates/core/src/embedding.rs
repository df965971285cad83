const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Unit words glued onto a preceding number when building terms.
const UNIT_WORDS: [&str; 9] = ["kv", "v", "a", "mm", "mm2", "sq", "core", "km", "m"];

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Signed feature hashing over cable terms; needs no model download.
///
/// Buckets come from FNV-1a, so vectors written to a store today still line
/// up with query vectors built by a later toolchain.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions()];
        for term in terms(text) {
            let (bucket, sign) = self.slot(&term);
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }

    fn slot(&self, term: &str) -> (usize, f32) {
        let seeded = fnv1a(FNV_OFFSET, &self.config.seed.to_le_bytes());
        let hash = fnv1a(seeded, term.as_bytes());
        let bucket = (hash % self.dimensions() as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

/// Lower-cased terms with quantities glued to their unit, so "11 kV",
/// "11kV" and "11-kv" all yield `11kv`, and "240 sq mm" yields `240sqmm`.
pub fn terms(text: &str) -> Vec<String> {
    let raw: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.into_iter().peekable();
    while let Some(term) = iter.next() {
        if term.parse::<f64>().is_ok() {
            if let Some(unit) = iter.next_if(|next| UNIT_WORDS.contains(&next.as_str())) {
                let unit = if unit == "sq" && iter.peek().map(String::as_str) == Some("mm") {
                    iter.next();
                    "sqmm".to_string()
                } else {
                    unit
                };
                out.push(format!("{term}{unit}"));
                continue;
            }
        }
        out.push(term);
    }
    out
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}

fn fnv1a(state: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(state, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME))
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
