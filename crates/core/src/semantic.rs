//! Tier 3 semantic search — embed code chunks with a local BERT model and
//! search them by cosine similarity.
//!
//! Embeddings are persisted in `embeddings.db` (a rusqlite database) next to
//! `symbols.db` and `index/` under the workspace's store directory, so the
//! model only has to run at index time, not at query time.

use crate::error::{CoreError, CoreResult};
use crate::stubs::extract_stub;
use crate::types::ScannedFile;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::{api::sync::Api, Repo, RepoType};
use rusqlite::Connection;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Model configuration — presets and custom HuggingFace models
// ---------------------------------------------------------------------------

/// Configuration for an embedding model.
pub struct ModelConfig {
    pub model_id: String,
    pub dim: usize,
    pub max_chunk_chars: usize,
}

/// Resolve a model name to its configuration.
///
/// Accepts preset names ("minilm", "codebert", "starencoder"), returns the
/// default (minilm) for `None`, or treats any other string as a custom
/// HuggingFace model ID (defaults to dim=768 — override `semantic_model`'s
/// paired dim in config for non-768 custom models).
pub fn resolve_model(name: Option<&str>) -> ModelConfig {
    match name {
        None | Some("minilm") => ModelConfig {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".into(),
            dim: 384,
            max_chunk_chars: 1500,
        },
        Some("codebert") => ModelConfig {
            model_id: "microsoft/codebert-base".into(),
            dim: 768,
            max_chunk_chars: 2000,
        },
        Some("starencoder") => {
            ModelConfig { model_id: "bigcode/starencoder".into(), dim: 768, max_chunk_chars: 2000 }
        }
        Some(custom) => {
            ModelConfig { model_id: custom.to_string(), dim: 768, max_chunk_chars: 2000 }
        }
    }
}

fn select_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(0) {
            Ok(dev) => return dev,
            Err(e) => warn!("CUDA unavailable ({e}), falling back to CPU"),
        }
    }
    Device::Cpu
}

// ---------------------------------------------------------------------------
// Chunk extraction
// ---------------------------------------------------------------------------

/// A code chunk ready for embedding.
struct Chunk {
    file_path: String,
    start_line: usize,
    text: String,
}

/// Extract embeddable chunks from scanned files using structural stubs.
fn extract_chunks(files: &[ScannedFile], max_chunk_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for file in files {
        let content = match std::fs::read_to_string(&file.abs_path) {
            Ok(c) => c,
            Err(_) => continue,
        };

        let stub = extract_stub(&content, &file.ext);
        if stub.trim().is_empty() {
            continue;
        }

        let mut current_chunk = String::new();
        let mut chunk_start_line = 1usize;
        let mut line_num = 1usize;

        for line in stub.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() && !current_chunk.trim().is_empty() {
                if current_chunk.len() >= 40 {
                    chunks.push(Chunk {
                        file_path: file.rel_path.clone(),
                        start_line: chunk_start_line,
                        text: current_chunk.clone(),
                    });
                }
                current_chunk.clear();
                chunk_start_line = line_num + 1;
            } else {
                if current_chunk.len() + line.len() + 1 > max_chunk_chars
                    && !current_chunk.is_empty()
                {
                    chunks.push(Chunk {
                        file_path: file.rel_path.clone(),
                        start_line: chunk_start_line,
                        text: current_chunk.clone(),
                    });
                    current_chunk.clear();
                    chunk_start_line = line_num;
                }
                if !current_chunk.is_empty() {
                    current_chunk.push('\n');
                }
                current_chunk.push_str(line);
            }
            line_num += 1;
        }

        if current_chunk.len() >= 40 {
            chunks.push(Chunk { file_path: file.rel_path.clone(), start_line: chunk_start_line, text: current_chunk });
        }
    }

    chunks
}

// ---------------------------------------------------------------------------
// Model loading
// ---------------------------------------------------------------------------

/// Load the BERT model and tokenizer from HuggingFace Hub.
/// Models are cached under hf-hub's default cache directory.
fn load_model(config: &ModelConfig) -> CoreResult<(BertModel, Tokenizer, Device)> {
    let model_id = &config.model_id;
    let device = select_device();
    let device_name = match &device {
        Device::Cpu => "CPU".to_string(),
        #[cfg(feature = "cuda")]
        Device::Cuda(_) => "CUDA GPU".to_string(),
        #[allow(unreachable_patterns)]
        _ => "unknown".to_string(),
    };

    let api = Api::new().map_err(|e| CoreError::Internal(format!("failed to create HF API: {e}")))?;
    let repo = api.repo(Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string()));

    info!(model_id, device = device_name, "loading embedding model");

    let config_path = repo
        .get("config.json")
        .map_err(|e| CoreError::Internal(format!("failed to fetch config.json: {e}")))?;
    let tokenizer_path = repo
        .get("tokenizer.json")
        .map_err(|e| CoreError::Internal(format!("failed to fetch tokenizer.json: {e}")))?;
    let weights_path = repo
        .get("model.safetensors")
        .map_err(|e| CoreError::Internal(format!("failed to fetch model.safetensors: {e}")))?;

    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| CoreError::Internal(format!("failed to read config: {e}")))?;
    let bert_config: BertConfig = serde_json::from_str(&config_str)
        .map_err(|e| CoreError::Internal(format!("failed to parse config: {e}")))?;

    let tokenizer = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| CoreError::Internal(format!("failed to load tokenizer: {e}")))?;

    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
            .map_err(|e| CoreError::Internal(format!("failed to mmap weights: {e}")))?
    };

    let model = BertModel::load(vb, &bert_config)
        .map_err(|e| CoreError::Internal(format!("failed to load BERT model: {e}")))?;

    debug!("embedding model loaded");
    Ok((model, tokenizer, device))
}

// ---------------------------------------------------------------------------
// Embedding generation
// ---------------------------------------------------------------------------

/// Encode a batch of texts into embeddings using mean pooling + L2 normalization.
fn encode_batch(
    model: &BertModel,
    tokenizer: &Tokenizer,
    device: &Device,
    texts: &[&str],
    dim: usize,
) -> CoreResult<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| CoreError::Internal(format!("tokenization failed: {e}")))?;

    let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

    let mut all_ids: Vec<u32> = Vec::new();
    let mut all_mask: Vec<u32> = Vec::new();
    let mut all_type_ids: Vec<u32> = Vec::new();

    for enc in &encodings {
        let ids = enc.get_ids();
        let mask = enc.get_attention_mask();
        let type_ids = enc.get_type_ids();
        let pad_len = max_len - ids.len();

        all_ids.extend_from_slice(ids);
        all_ids.extend(std::iter::repeat(0u32).take(pad_len));
        all_mask.extend_from_slice(mask);
        all_mask.extend(std::iter::repeat(0u32).take(pad_len));
        all_type_ids.extend_from_slice(type_ids);
        all_type_ids.extend(std::iter::repeat(0u32).take(pad_len));
    }

    let batch_size = texts.len();
    let input_ids = Tensor::from_vec(all_ids, (batch_size, max_len), device)
        .map_err(|e| CoreError::Internal(format!("tensor creation failed: {e}")))?;
    let attention_mask = Tensor::from_vec(
        all_mask.iter().map(|&x| x as f32).collect::<Vec<_>>(),
        (batch_size, max_len),
        device,
    )
    .map_err(|e| CoreError::Internal(format!("tensor creation failed: {e}")))?;
    let token_type_ids = Tensor::from_vec(all_type_ids, (batch_size, max_len), device)
        .map_err(|e| CoreError::Internal(format!("tensor creation failed: {e}")))?;

    let output = model
        .forward(&input_ids, &token_type_ids, Some(&attention_mask))
        .map_err(|e| CoreError::Internal(format!("model forward pass failed: {e}")))?;

    let mask_expanded = attention_mask
        .unsqueeze(2)
        .and_then(|m| m.broadcast_as(output.shape()))
        .map_err(|e| CoreError::Internal(format!("mask broadcast failed: {e}")))?;

    let masked = output.mul(&mask_expanded).map_err(|e| CoreError::Internal(format!("mul failed: {e}")))?;
    let summed = masked.sum(1).map_err(|e| CoreError::Internal(format!("sum failed: {e}")))?;

    let mask_sum = mask_expanded
        .sum(1)
        .and_then(|s| s.clamp(1e-9, f64::MAX))
        .map_err(|e| CoreError::Internal(format!("mask sum failed: {e}")))?;

    let mean_pooled = summed.div(&mask_sum).map_err(|e| CoreError::Internal(format!("div failed: {e}")))?;

    let norms = mean_pooled
        .sqr()
        .and_then(|t| t.sum(1))
        .and_then(|t| t.sqrt())
        .and_then(|t| t.unsqueeze(1))
        .and_then(|t| t.broadcast_as(mean_pooled.shape()))
        .and_then(|t| t.clamp(1e-9, f64::MAX))
        .map_err(|e| CoreError::Internal(format!("norm failed: {e}")))?;

    let normalized = mean_pooled.div(&norms).map_err(|e| CoreError::Internal(format!("div failed: {e}")))?;

    let flat: Vec<f32> = normalized
        .flatten_all()
        .and_then(|t| t.to_vec1())
        .map_err(|e| CoreError::Internal(format!("flatten failed: {e}")))?;

    let mut result = Vec::with_capacity(batch_size);
    for i in 0..batch_size {
        let start = i * dim;
        let end = start + dim;
        result.push(flat[start..end].to_vec());
    }

    Ok(result)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8)
}

// ---------------------------------------------------------------------------
// On-disk embedding store
// ---------------------------------------------------------------------------

fn open_embeddings_db(path: &Path) -> CoreResult<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| CoreError::Internal(format!("failed to open embeddings.db: {e}")))?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS chunks (
             id INTEGER PRIMARY KEY,
             file_path TEXT NOT NULL,
             start_line INTEGER NOT NULL,
             snippet TEXT NOT NULL,
             embedding BLOB NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);",
    )
    .map_err(|e| CoreError::Internal(format!("failed to init embeddings.db schema: {e}")))?;
    Ok(conn)
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![key, value],
    )
    .map_err(|e| CoreError::Internal(format!("failed to write meta: {e}")))?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| row.get(0)).ok()
}

fn f32s_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_f32s(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

/// Returns true if `embeddings.db` at this path has at least one chunk indexed.
pub fn is_available(store_path: &Path) -> bool {
    let Ok(conn) = Connection::open(store_path) else { return false };
    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get::<_, i64>(0))
        .map(|n| n > 0)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Index building
// ---------------------------------------------------------------------------

/// Build (or rebuild) the semantic index for a workspace, writing it to
/// `embeddings.db` at `store_path`. Uses parallel worker-group embedding to
/// saturate CPU cores, or a single large-batch worker on GPU.
///
/// Returns the number of chunks indexed. Returns `Ok(0)` (not an error) when
/// no chunks could be extracted — callers treat a zero-chunk index the same
/// as an absent one via `is_available`.
pub fn build_index(
    store_path: &Path,
    files: &[ScannedFile],
    model_name: Option<&str>,
) -> CoreResult<usize> {
    let model_config = resolve_model(model_name);
    let chunks = extract_chunks(files, model_config.max_chunk_chars);
    if chunks.is_empty() {
        info!("no chunks extracted, skipping semantic index");
        return Ok(0);
    }

    info!(chunks = chunks.len(), files = files.len(), "extracted chunks for embedding");

    let use_gpu = match load_model(&model_config) {
        Ok((_, _, ref dev)) => !matches!(dev, Device::Cpu),
        Err(e) => {
            warn!("failed to load embedding model: {e}");
            return Err(e);
        }
    };

    let batch_size = if use_gpu { 128 } else { 32 };
    let total_batches = chunks.len().div_ceil(batch_size);
    let n_workers = if use_gpu { 1 } else { num_cpus().min(total_batches).max(1) };

    info!(total_batches, n_workers, device = if use_gpu { "GPU" } else { "CPU" }, "embedding chunks");

    let batches: Vec<&[Chunk]> = chunks.chunks(batch_size).collect();
    let group_size = batches.len().div_ceil(n_workers);
    let groups: Vec<Vec<&[Chunk]>> = batches.chunks(group_size).map(|g| g.to_vec()).collect();

    let progress = std::sync::atomic::AtomicUsize::new(0);
    let model_config_ref = &model_config;

    let results: Vec<Option<Vec<(String, usize, String, Vec<f32>)>>> = std::thread::scope(|s| {
        let handles: Vec<_> = groups
            .iter()
            .enumerate()
            .map(|(worker_id, group)| {
                let progress = &progress;
                s.spawn(move || {
                    let (model, tokenizer, device) = match load_model(model_config_ref) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!("worker {worker_id} failed to load model: {e}");
                            return None;
                        }
                    };

                    let mut rows: Vec<(String, usize, String, Vec<f32>)> = Vec::new();

                    for batch in group {
                        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
                        match encode_batch(&model, &tokenizer, &device, &texts, model_config_ref.dim) {
                            Ok(embeddings) => {
                                for (i, emb) in embeddings.into_iter().enumerate() {
                                    let chunk = &batch[i];
                                    let snippet = if chunk.text.len() > 200 {
                                        let mut end = 200;
                                        while !chunk.text.is_char_boundary(end) && end > 0 {
                                            end -= 1;
                                        }
                                        chunk.text[..end].to_string()
                                    } else {
                                        chunk.text.clone()
                                    };
                                    rows.push((chunk.file_path.clone(), chunk.start_line, snippet, emb));
                                }
                            }
                            Err(e) => {
                                warn!("worker {worker_id} batch failed: {e}");
                                continue;
                            }
                        }

                        let done = progress.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                        if done % 20 == 0 || done == total_batches {
                            debug!("embedding progress: {done}/{total_batches} batches");
                        }
                    }

                    Some(rows)
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap_or(None)).collect()
    });

    if store_path.exists() {
        std::fs::remove_file(store_path)
            .map_err(|e| CoreError::Io { path: store_path.to_path_buf(), source: e })?;
    }
    let mut conn = open_embeddings_db(store_path)?;
    let tx = conn
        .transaction()
        .map_err(|e| CoreError::Internal(format!("failed to start transaction: {e}")))?;
    let mut written = 0usize;
    {
        let mut stmt = tx
            .prepare("INSERT INTO chunks (file_path, start_line, snippet, embedding) VALUES (?1, ?2, ?3, ?4)")
            .map_err(|e| CoreError::Internal(format!("failed to prepare insert: {e}")))?;
        for rows in results.into_iter().flatten() {
            for (file_path, start_line, snippet, emb) in rows {
                stmt.execute(rusqlite::params![file_path, start_line as i64, snippet, f32s_to_bytes(&emb)])
                    .map_err(|e| CoreError::Internal(format!("failed to insert chunk: {e}")))?;
                written += 1;
            }
        }
    }
    tx.commit().map_err(|e| CoreError::Internal(format!("failed to commit: {e}")))?;

    set_meta(&conn, "dim", &model_config.dim.to_string())?;
    set_meta(&conn, "model_name", model_name.unwrap_or("minilm"))?;
    let _ = &mut conn;

    info!(chunks = written, "semantic index built");
    Ok(written)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Result of a semantic search query.
pub struct SemanticSearchResult {
    pub file_path: String,
    pub start_line: usize,
    pub snippet: String,
    pub score: f32,
}

/// Search `embeddings.db` for chunks similar to `query`.
///
/// Returns `CoreError::SemanticUnavailable` when the store doesn't exist or
/// holds no chunks.
pub fn search(store_path: &Path, query: &str, limit: usize) -> CoreResult<Vec<SemanticSearchResult>> {
    if !is_available(store_path) {
        return Err(CoreError::SemanticUnavailable);
    }

    let conn = open_embeddings_db(store_path)?;
    let model_name = get_meta(&conn, "model_name");
    let dim: usize = get_meta(&conn, "dim")
        .and_then(|s| s.parse().ok())
        .ok_or(CoreError::SemanticUnavailable)?;

    let model_config = resolve_model(model_name.as_deref());
    let (model, tokenizer, device) = load_model(&model_config)?;

    let query_embeddings = encode_batch(&model, &tokenizer, &device, &[query], dim)?;
    if query_embeddings.is_empty() {
        return Ok(Vec::new());
    }
    let query_emb = &query_embeddings[0];

    let mut stmt = conn
        .prepare("SELECT file_path, start_line, snippet, embedding FROM chunks")
        .map_err(|e| CoreError::Internal(format!("failed to query chunks: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let file_path: String = row.get(0)?;
            let start_line: i64 = row.get(1)?;
            let snippet: String = row.get(2)?;
            let embedding: Vec<u8> = row.get(3)?;
            Ok((file_path, start_line as usize, snippet, embedding))
        })
        .map_err(|e| CoreError::Internal(format!("failed to iterate chunks: {e}")))?;

    let mut scored: Vec<(String, usize, String, f32)> = Vec::new();
    for row in rows {
        let (file_path, start_line, snippet, embedding) =
            row.map_err(|e| CoreError::Internal(format!("failed to read chunk row: {e}")))?;
        let chunk_emb = bytes_to_f32s(&embedding);
        let dot: f32 = query_emb.iter().zip(chunk_emb.iter()).map(|(a, b)| a * b).sum();
        scored.push((file_path, start_line, snippet, dot));
    }

    scored.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    Ok(scored
        .into_iter()
        .map(|(file_path, start_line, snippet, score)| SemanticSearchResult { file_path, start_line, snippet, score })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_model_defaults_to_minilm() {
        let cfg = resolve_model(None);
        assert_eq!(cfg.model_id, "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(cfg.dim, 384);
    }

    #[test]
    fn resolve_model_custom_name_defaults_dim_768() {
        let cfg = resolve_model(Some("org/my-model"));
        assert_eq!(cfg.model_id, "org/my-model");
        assert_eq!(cfg.dim, 768);
    }

    #[test]
    fn f32_byte_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.0, 3.25];
        let bytes = f32s_to_bytes(&v);
        let back = bytes_to_f32s(&bytes);
        assert_eq!(v, back);
    }

    #[test]
    fn empty_embeddings_db_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.db");
        let conn = open_embeddings_db(&path).unwrap();
        drop(conn);
        assert!(!is_available(&path));
    }

    #[test]
    fn missing_embeddings_db_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.db");
        assert!(!is_available(&path));
    }
}
