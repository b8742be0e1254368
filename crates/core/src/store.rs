//! The Workspace Store (C1) — inverted index (tantivy), symbol database
//! (rusqlite), and an optional embedding table (`semantic.rs`), kept
//! consistent per workspace under `<workspace>/.codescope/`.

use crate::ast::AstIndex;
use crate::config::WorkspaceConfig;
use crate::error::{CoreError, CoreResult};
use crate::scan::{self, DirectoryRecord};
use crate::semantic;
use crate::types::{
    Document, Encoding, Hit, IdentifierOccurrence, QueryResult, ReferenceRole, ScannedFile, Symbol, SymbolKind,
    Visibility,
};

use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::tokenizer::{TextAnalyzer, Token, TokenStream, Tokenizer};
use tantivy::{doc, Index, IndexReader, IndexWriter, TantivyDocument, Term};
use tracing::{debug, info, warn};

const CODE_TOKENIZER_NAME: &str = "code";
const WRITER_HEAP_BYTES: usize = 50_000_000;

// ---------------------------------------------------------------------------
// Code tokenizer — camelCase/snake_case splitting, operator tokens preserved
// ---------------------------------------------------------------------------

/// Splits identifiers on camelCase/PascalCase/snake_case boundaries and keeps
/// common multi-character operators (`==`, `->`, `::`, ...) as single tokens,
/// so `getUserById` indexes as `get`, `user`, `by`, `id` alongside the exact
/// identifier, and the scorer's exact-phrase bonus still matches literal
/// operator tokens in code snippets.
#[derive(Clone, Default)]
struct CodeTokenizer;

const OPERATORS: &[&str] =
    &["==", "!=", "<=", ">=", "&&", "||", "->", "=>", "::", "+=", "-=", "*=", "/="];

fn split_code_identifiers(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut position = 0usize;
    let bytes = text.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        let rest = &text[i..];
        if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(*op)) {
            tokens.push(Token {
                offset_from: i,
                offset_to: i + op.len(),
                position,
                text: op.to_string(),
                position_length: 1,
            });
            position += 1;
            i += op.len();
            continue;
        }

        let ch = rest.chars().next().unwrap();
        if ch.is_alphanumeric() {
            let start = i;
            let mut word_chars: Vec<char> = Vec::new();
            let mut j = i;
            for c in rest.chars() {
                if c.is_alphanumeric() || c == '_' {
                    word_chars.push(c);
                    j += c.len_utf8();
                } else {
                    break;
                }
            }
            for piece in split_identifier_parts(&word_chars) {
                if piece.is_empty() {
                    continue;
                }
                tokens.push(Token {
                    offset_from: start,
                    offset_to: j,
                    position,
                    text: piece.to_lowercase(),
                    position_length: 1,
                });
                position += 1;
            }
            i = j;
        } else {
            i += ch.len_utf8();
        }
    }

    tokens
}

/// Split `camelCase`, `PascalCase` and `snake_case` into lowercase words.
fn split_identifier_parts(chars: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for (idx, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            continue;
        }
        let starts_new_word = idx > 0
            && c.is_uppercase()
            && (chars[idx - 1].is_lowercase()
                || (idx + 1 < chars.len() && chars[idx - 1].is_uppercase() && chars[idx + 1].is_lowercase()));
        if starts_new_word && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

struct CodeTokenStream {
    tokens: Vec<Token>,
    index: usize,
}

impl TokenStream for CodeTokenStream {
    fn advance(&mut self) -> bool {
        if self.index < self.tokens.len() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn token(&self) -> &Token {
        &self.tokens[self.index - 1]
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.tokens[self.index - 1]
    }
}

impl Tokenizer for CodeTokenizer {
    type TokenStream<'a> = CodeTokenStream;

    fn token_stream<'a>(&mut self, text: &'a str) -> CodeTokenStream {
        CodeTokenStream { tokens: split_code_identifiers(text), index: 0 }
    }
}

// ---------------------------------------------------------------------------
// Tantivy schema — six fields per §4.1: content, content_symbols, filename,
// path, type_names, extension.
// ---------------------------------------------------------------------------

struct SchemaFields {
    schema: Schema,
    content: Field,
    content_symbols: Field,
    filename: Field,
    path: Field,
    type_names: Field,
    extension: Field,
}

fn build_schema() -> SchemaFields {
    let mut builder = Schema::builder();
    let content = builder.add_text_field("content", TEXT | STORED);
    let content_symbols =
        builder.add_text_field("content_symbols", tantivy::schema::TextOptions::default().set_indexing_options(
            tantivy::schema::TextFieldIndexing::default()
                .set_tokenizer(CODE_TOKENIZER_NAME)
                .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
        ));
    let filename = builder.add_text_field("filename", TEXT | STORED);
    let path = builder.add_text_field("path", STRING | STORED);
    let type_names = builder.add_text_field(
        "type_names",
        tantivy::schema::TextOptions::default().set_indexing_options(
            tantivy::schema::TextFieldIndexing::default()
                .set_tokenizer(CODE_TOKENIZER_NAME)
                .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
        ),
    );
    let extension = builder.add_text_field("extension", STRING | STORED);
    let schema = builder.build();
    SchemaFields { schema, content, content_symbols, filename, path, type_names, extension }
}

fn register_code_tokenizer(index: &Index) {
    index.tokenizers().register(CODE_TOKENIZER_NAME, TextAnalyzer::builder(CodeTokenizer).build());
}

// ---------------------------------------------------------------------------
// Workspace handle
// ---------------------------------------------------------------------------

pub struct WorkspaceHandle {
    pub workspace: PathBuf,
    store_dir: PathBuf,
    index: Index,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    fields: SchemaFields,
    symbols_conn: Mutex<Connection>,
}

fn symbols_db_path(store_dir: &Path) -> PathBuf {
    store_dir.join("symbols.db")
}

fn embeddings_db_path(store_dir: &Path) -> PathBuf {
    store_dir.join("embeddings.db")
}

fn index_dir_path(store_dir: &Path) -> PathBuf {
    store_dir.join("index")
}

fn open_symbols_db(store_dir: &Path) -> CoreResult<Connection> {
    let conn = Connection::open(symbols_db_path(store_dir))
        .map_err(|e| CoreError::IndexCorrupt(store_dir.to_path_buf(), e.to_string()))?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
             path TEXT PRIMARY KEY,
             abs_path TEXT NOT NULL,
             ext TEXT NOT NULL,
             language TEXT NOT NULL,
             size INTEGER NOT NULL,
             last_modified INTEGER NOT NULL,
             encoding TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS symbols (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             kind TEXT NOT NULL,
             language TEXT NOT NULL,
             file_path TEXT NOT NULL,
             start_line INTEGER NOT NULL,
             end_line INTEGER NOT NULL,
             start_column INTEGER NOT NULL,
             end_column INTEGER NOT NULL,
             start_byte INTEGER NOT NULL,
             end_byte INTEGER NOT NULL,
             visibility TEXT NOT NULL,
             signature TEXT NOT NULL,
             containing_symbol TEXT,
             doc_comment TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
         CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);
         CREATE TABLE IF NOT EXISTS identifier_occurrences (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             role TEXT NOT NULL,
             file_path TEXT NOT NULL,
             start_line INTEGER NOT NULL,
             end_line INTEGER NOT NULL,
             start_column INTEGER NOT NULL,
             end_column INTEGER NOT NULL,
             start_byte INTEGER NOT NULL,
             end_byte INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_occ_name ON identifier_occurrences(name);
         CREATE INDEX IF NOT EXISTS idx_occ_file_line ON identifier_occurrences(file_path, start_line);",
    )
    .map_err(|e| CoreError::IndexCorrupt(store_dir.to_path_buf(), e.to_string()))?;
    Ok(conn)
}

/// Creates or opens the three backing artifacts for `workspace`. Idempotent.
pub fn open(workspace: &Path) -> CoreResult<WorkspaceHandle> {
    let store_dir = WorkspaceConfig::store_dir(workspace);
    std::fs::create_dir_all(&store_dir)
        .map_err(|e| CoreError::Io { path: store_dir.clone(), source: e })?;

    let index_dir = index_dir_path(&store_dir);
    let fields = build_schema();

    let index = if index_dir.exists() && Index::open_in_dir(&index_dir).is_ok() {
        Index::open_in_dir(&index_dir)
            .map_err(|e| CoreError::IndexCorrupt(index_dir.clone(), e.to_string()))?
    } else {
        std::fs::create_dir_all(&index_dir)
            .map_err(|e| CoreError::Io { path: index_dir.clone(), source: e })?;
        Index::create_in_dir(&index_dir, fields.schema.clone())
            .map_err(|e| CoreError::IndexCorrupt(index_dir.clone(), e.to_string()))?
    };
    register_code_tokenizer(&index);

    let writer = index
        .writer(WRITER_HEAP_BYTES)
        .map_err(|e| CoreError::IndexCorrupt(index_dir.clone(), e.to_string()))?;
    let reader = index
        .reader()
        .map_err(|e| CoreError::IndexCorrupt(index_dir.clone(), e.to_string()))?;

    let symbols_conn = open_symbols_db(&store_dir)?;

    Ok(WorkspaceHandle {
        workspace: workspace.to_path_buf(),
        store_dir,
        index,
        writer: Mutex::new(writer),
        reader,
        fields,
        symbols_conn: Mutex::new(symbols_conn),
    })
}

/// Whether a store already exists on disk for `workspace`, without opening it.
pub fn exists(workspace: &Path) -> bool {
    let store_dir = WorkspaceConfig::store_dir(workspace);
    symbols_db_path(&store_dir).exists() && index_dir_path(&store_dir).exists()
}

impl WorkspaceHandle {
    pub fn embeddings_db_path(&self) -> PathBuf {
        embeddings_db_path(&self.store_dir)
    }

    pub fn is_semantic_available(&self) -> bool {
        semantic::is_available(&self.embeddings_db_path())
    }

    /// Rebuild the full index (tantivy + symbol DB) from a fresh scan. Used
    /// by `index_workspace`; incremental updates go through `update_file`.
    pub fn index_files(
        &self,
        files: &[ScannedFile],
        ast_index: &AstIndex,
        occurrences: &[IdentifierOccurrence],
    ) -> CoreResult<()> {
        let start = Instant::now();

        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| CoreError::Internal("index writer lock poisoned".into()))?;
            writer
                .delete_all_documents()
                .map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;

            for file in files {
                let content = std::fs::read_to_string(&file.abs_path).unwrap_or_default();
                let filename =
                    Path::new(&file.rel_path).file_name().and_then(|f| f.to_str()).unwrap_or("").to_string();
                let type_names = ast_index
                    .get(&file.rel_path)
                    .map(|ast| ast.symbols.iter().map(|s| s.name.clone()).collect::<Vec<_>>().join(" "))
                    .unwrap_or_default();

                let document = doc!(
                    self.fields.content => content,
                    self.fields.content_symbols => type_names.clone(),
                    self.fields.filename => filename,
                    self.fields.path => file.rel_path.clone(),
                    self.fields.type_names => type_names,
                    self.fields.extension => file.ext.clone(),
                );
                writer
                    .add_document(document)
                    .map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;
            }

            writer
                .commit()
                .map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;
        }
        self.reader
            .reload()
            .map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;

        let conn = self
            .symbols_conn
            .lock()
            .map_err(|_| CoreError::Internal("symbols db lock poisoned".into()))?;
        write_symbols_db(&conn, files, ast_index, occurrences)?;

        info!(files = files.len(), time_ms = start.elapsed().as_millis() as u64, "workspace store rebuilt");
        Ok(())
    }

    /// Incrementally re-index a single file after a filesystem change,
    /// keeping the symbol DB and inverted index mutually consistent.
    pub fn update_file(
        &self,
        file: &ScannedFile,
        ast_index: &AstIndex,
        occurrences: &[IdentifierOccurrence],
    ) -> CoreResult<()> {
        let content = std::fs::read_to_string(&file.abs_path).unwrap_or_default();
        let filename =
            Path::new(&file.rel_path).file_name().and_then(|f| f.to_str()).unwrap_or("").to_string();
        let type_names = ast_index
            .get(&file.rel_path)
            .map(|ast| ast.symbols.iter().map(|s| s.name.clone()).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();

        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| CoreError::Internal("index writer lock poisoned".into()))?;
            writer.delete_term(Term::from_field_text(self.fields.path, &file.rel_path));
            let document = doc!(
                self.fields.content => content,
                self.fields.content_symbols => type_names.clone(),
                self.fields.filename => filename,
                self.fields.path => file.rel_path.clone(),
                self.fields.type_names => type_names,
                self.fields.extension => file.ext.clone(),
            );
            writer
                .add_document(document)
                .map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;
            writer
                .commit()
                .map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;
        }
        self.reader
            .reload()
            .map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;

        let conn = self
            .symbols_conn
            .lock()
            .map_err(|_| CoreError::Internal("symbols db lock poisoned".into()))?;
        conn.execute("DELETE FROM files WHERE path = ?1", params![file.rel_path])
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        conn.execute("DELETE FROM symbols WHERE file_path = ?1", params![file.rel_path])
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        conn.execute("DELETE FROM identifier_occurrences WHERE file_path = ?1", params![file.rel_path])
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        write_symbols_db(&conn, std::slice::from_ref(file), ast_index, occurrences)?;
        Ok(())
    }

    /// Drop a file that no longer exists on disk from both the inverted
    /// index and the symbol DB. Counterpart to `update_file` for delete
    /// events from the file watcher.
    pub fn remove_file(&self, rel_path: &str) -> CoreResult<()> {
        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| CoreError::Internal("index writer lock poisoned".into()))?;
            writer.delete_term(Term::from_field_text(self.fields.path, rel_path));
            writer.commit().map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;
        }
        self.reader.reload().map_err(|e| CoreError::IndexCorrupt(self.store_dir.clone(), e.to_string()))?;

        let conn = self
            .symbols_conn
            .lock()
            .map_err(|_| CoreError::Internal("symbols db lock poisoned".into()))?;
        conn.execute("DELETE FROM files WHERE path = ?1", params![rel_path])
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        conn.execute("DELETE FROM symbols WHERE file_path = ?1", params![rel_path])
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        conn.execute("DELETE FROM identifier_occurrences WHERE file_path = ?1", params![rel_path])
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        Ok(())
    }

    /// Analyzer-aware text search across `content`/`content_symbols`/
    /// `filename`/`type_names`, ranked by tantivy's BM25 relevance.
    pub fn search(&self, query: &str, limit: usize, want_snippets: bool) -> CoreResult<QueryResult> {
        let parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.content, self.fields.content_symbols, self.fields.filename, self.fields.type_names],
        );
        let parsed = parser.parse_query(query).map_err(|e| CoreError::InvalidQuery(e.to_string()))?;
        self.run_query(parsed.as_ref(), limit, want_snippets)
    }

    /// `Symbol` mode: query restricted to `content_symbols`/`type_names`.
    pub fn search_symbol_field(&self, query: &str, limit: usize, want_snippets: bool) -> CoreResult<QueryResult> {
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content_symbols, self.fields.type_names]);
        let parsed = parser.parse_query(query).map_err(|e| CoreError::InvalidQuery(e.to_string()))?;
        self.run_query(parsed.as_ref(), limit, want_snippets)
    }

    /// `Exact` mode: literal phrase query on `content` only.
    pub fn search_exact(&self, query: &str, limit: usize, want_snippets: bool) -> CoreResult<QueryResult> {
        let mut parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        parser.set_conjunction_by_default();
        let escaped = format!("\"{}\"", query.replace('"', "\\\""));
        let parsed = parser.parse_query(&escaped).map_err(|e| CoreError::InvalidQuery(e.to_string()))?;
        self.run_query(parsed.as_ref(), limit, want_snippets)
    }

    /// `Regex` mode: regex query on `content`.
    pub fn search_regex(&self, pattern: &str, limit: usize, want_snippets: bool) -> CoreResult<QueryResult> {
        let query = tantivy::query::RegexQuery::from_pattern(pattern, self.fields.content)
            .map_err(|e| CoreError::InvalidQuery(e.to_string()))?;
        self.run_query(&query, limit, want_snippets)
    }

    /// `Fuzzy` mode: per-token edit-distance query on `content`, OR-combined.
    pub fn search_fuzzy(&self, query: &str, limit: usize, want_snippets: bool) -> CoreResult<QueryResult> {
        let terms: Vec<_> = query
            .split_whitespace()
            .map(|word| {
                let term = Term::from_field_text(self.fields.content, &word.to_lowercase());
                let fuzzy = tantivy::query::FuzzyTermQuery::new(term, 2, true);
                (tantivy::query::Occur::Should, Box::new(fuzzy) as Box<dyn tantivy::query::Query>)
            })
            .collect();
        if terms.is_empty() {
            return Err(CoreError::InvalidQuery("empty fuzzy query".into()));
        }
        let combined = tantivy::query::BooleanQuery::new(terms);
        self.run_query(&combined, limit, want_snippets)
    }

    fn run_query(&self, query: &dyn tantivy::query::Query, limit: usize, want_snippets: bool) -> CoreResult<QueryResult> {
        let start = Instant::now();
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(query, &TopDocs::with_limit(limit))
            .map_err(|e| CoreError::SearchError(e.to_string()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in &top_docs {
            let retrieved: TantivyDocument =
                searcher.doc(*addr).map_err(|e| CoreError::SearchError(e.to_string()))?;
            let path = retrieved
                .get_first(self.fields.path)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let snippet = if want_snippets {
                retrieved.get_first(self.fields.content).and_then(|v| v.as_str()).map(|c| {
                    let mut end = c.len().min(240);
                    while !c.is_char_boundary(end) && end > 0 {
                        end -= 1;
                    }
                    c[..end].to_string()
                })
            } else {
                None
            };
            hits.push(Hit { path, start_line: 1, end_line: 1, score: *score as f64, snippet, source: "tier2" });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.start_line.cmp(&b.start_line))
        });

        Ok(QueryResult {
            total: hits.len(),
            truncated: hits.len() >= limit,
            hits,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub fn get_symbols_by_name(&self, name: &str, case_sensitive: bool) -> CoreResult<Vec<Symbol>> {
        let conn = self
            .symbols_conn
            .lock()
            .map_err(|_| CoreError::Internal("symbols db lock poisoned".into()))?;
        let sql = if case_sensitive {
            "SELECT name, kind, language, file_path, start_line, end_line, start_column, end_column, \
             start_byte, end_byte, visibility, signature, containing_symbol, doc_comment \
             FROM symbols WHERE name = ?1"
        } else {
            "SELECT name, kind, language, file_path, start_line, end_line, start_column, end_column, \
             start_byte, end_byte, visibility, signature, containing_symbol, doc_comment \
             FROM symbols WHERE name = ?1 COLLATE NOCASE"
        };
        let mut stmt = conn.prepare(sql).map_err(|e| CoreError::Internal(e.to_string()))?;
        let rows = stmt
            .query_map(params![name], row_to_symbol)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| CoreError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    pub fn get_recent_files(
        &self,
        cutoff_unix_seconds: i64,
        limit: usize,
        ext_filter: Option<&str>,
    ) -> CoreResult<Vec<Document>> {
        let conn = self
            .symbols_conn
            .lock()
            .map_err(|_| CoreError::Internal("symbols db lock poisoned".into()))?;
        let mut out = Vec::new();
        let mut stmt = if let Some(ext) = ext_filter {
            conn.prepare(
                "SELECT path, abs_path, ext, language, size, last_modified, encoding FROM files \
                 WHERE last_modified >= ?1 AND ext = ?2 ORDER BY last_modified DESC LIMIT ?3",
            )
            .map_err(|e| CoreError::Internal(e.to_string()))?
        } else {
            conn.prepare(
                "SELECT path, abs_path, ext, language, size, last_modified, encoding FROM files \
                 WHERE last_modified >= ?1 ORDER BY last_modified DESC LIMIT ?2",
            )
            .map_err(|e| CoreError::Internal(e.to_string()))?
        };

        let rows = if let Some(ext) = ext_filter {
            stmt.query_map(params![cutoff_unix_seconds, ext, limit as i64], row_to_document)
        } else {
            stmt.query_map(params![cutoff_unix_seconds, limit as i64], row_to_document)
        }
        .map_err(|e| CoreError::Internal(e.to_string()))?;

        for row in rows {
            out.push(row.map_err(|e| CoreError::Internal(e.to_string()))?);
        }
        Ok(out)
    }

    pub fn get_file_by_path(&self, path: &str) -> CoreResult<Option<Document>> {
        let conn = self
            .symbols_conn
            .lock()
            .map_err(|_| CoreError::Internal("symbols db lock poisoned".into()))?;
        let mut stmt = conn
            .prepare("SELECT path, abs_path, ext, language, size, last_modified, encoding FROM files WHERE path = ?1")
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let mut rows = stmt
            .query_map(params![path], row_to_document)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(|e| CoreError::Internal(e.to_string()))?)),
            None => Ok(None),
        }
    }

    /// Fails with `SemanticUnavailable` if `embeddings.db` holds no chunks.
    pub fn search_symbols_semantic(
        &self,
        text: &str,
        limit: usize,
    ) -> CoreResult<Vec<(String, usize, String, f32)>> {
        let results = semantic::search(&self.embeddings_db_path(), text, limit)?;
        Ok(results.into_iter().map(|r| (r.file_path, r.start_line, r.snippet, r.score)).collect())
    }

    pub fn search_directories(
        &self,
        pattern: &str,
        include_hidden: bool,
        limit: usize,
    ) -> CoreResult<Vec<String>> {
        let files = scan::scan_files(&self.workspace, &WorkspaceConfig::load(&self.workspace));
        let dirs: Vec<DirectoryRecord> = scan::enumerate_directories(&files);
        let hits = crate::fuzzy::fuzzy_search_directories(&dirs, pattern, false, include_hidden, limit)
            .map_err(|e| CoreError::InvalidQuery(e.to_string()))?;
        Ok(hits.into_iter().map(|h| h.record.path).collect())
    }
}

fn row_to_symbol(row: &rusqlite::Row) -> rusqlite::Result<Symbol> {
    let kind_str: String = row.get(1)?;
    let visibility_str: String = row.get(10)?;
    Ok(Symbol {
        name: row.get(0)?,
        kind: SymbolKind::parse(&kind_str).unwrap_or(SymbolKind::Variable),
        language: row.get(2)?,
        file_path: row.get(3)?,
        start_line: row.get::<_, i64>(4)? as usize,
        end_line: row.get::<_, i64>(5)? as usize,
        start_column: row.get::<_, i64>(6)? as usize,
        end_column: row.get::<_, i64>(7)? as usize,
        start_byte: row.get::<_, i64>(8)? as usize,
        end_byte: row.get::<_, i64>(9)? as usize,
        visibility: parse_visibility(&visibility_str),
        signature: row.get(11)?,
        containing_symbol: row.get(12)?,
        doc_comment: row.get(13)?,
    })
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let encoding_str: String = row.get(6)?;
    Ok(Document {
        rel_path: row.get(0)?,
        abs_path: PathBuf::from(row.get::<_, String>(1)?),
        ext: row.get(2)?,
        language: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        last_modified: row.get(5)?,
        encoding: match encoding_str.as_str() {
            "utf16le" => Encoding::Utf16Le,
            "utf16be" => Encoding::Utf16Be,
            _ => Encoding::Utf8,
        },
    })
}

fn parse_visibility(s: &str) -> Visibility {
    match s {
        "private" => Visibility::Private,
        "protected" => Visibility::Protected,
        "internal" => Visibility::Internal,
        _ => Visibility::Public,
    }
}

fn write_symbols_db(
    conn: &Connection,
    files: &[ScannedFile],
    ast_index: &AstIndex,
    occurrences: &[IdentifierOccurrence],
) -> CoreResult<()> {
    for file in files {
        let language = crate::ast::language_tag(&file.ext);
        conn.execute(
            "INSERT INTO files (path, abs_path, ext, language, size, last_modified, encoding) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'utf8') \
             ON CONFLICT(path) DO UPDATE SET abs_path=excluded.abs_path, ext=excluded.ext, \
             language=excluded.language, size=excluded.size, last_modified=excluded.last_modified",
            params![
                file.rel_path,
                file.abs_path.to_string_lossy().to_string(),
                file.ext,
                language,
                file.size as i64,
                file.last_modified,
            ],
        )
        .map_err(|e| CoreError::Internal(e.to_string()))?;

        if let Some(ast) = ast_index.get(&file.rel_path) {
            for sym in ast.clone().into_symbols() {
                conn.execute(
                    "INSERT INTO symbols (name, kind, language, file_path, start_line, end_line, \
                     start_column, end_column, start_byte, end_byte, visibility, signature, \
                     containing_symbol, doc_comment) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                    params![
                        sym.name,
                        sym.kind.label(),
                        sym.language,
                        sym.file_path,
                        sym.start_line as i64,
                        sym.end_line as i64,
                        sym.start_column as i64,
                        sym.end_column as i64,
                        sym.start_byte as i64,
                        sym.end_byte as i64,
                        sym.visibility.label(),
                        sym.signature,
                        sym.containing_symbol,
                        sym.doc_comment,
                    ],
                )
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            }
        }
    }

    let indexed_paths: std::collections::HashSet<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
    for occ in occurrences {
        if !indexed_paths.contains(occ.file_path.as_str()) {
            continue;
        }
        conn.execute(
            "INSERT INTO identifier_occurrences (name, role, file_path, start_line, end_line, \
             start_column, end_column, start_byte, end_byte) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                occ.name,
                occ.role.label(),
                occ.file_path,
                occ.start_line as i64,
                occ.end_line as i64,
                occ.start_column as i64,
                occ.end_column as i64,
                occ.start_byte as i64,
                occ.end_byte as i64,
            ],
        )
        .map_err(|e| CoreError::Internal(e.to_string()))?;
    }
    Ok(())
}

fn parse_reference_role(label: &str) -> ReferenceRole {
    match label {
        "call" => ReferenceRole::Call,
        "type-use" => ReferenceRole::TypeUse,
        "import" => ReferenceRole::Import,
        _ => ReferenceRole::Reference,
    }
}

impl WorkspaceHandle {
    /// All recorded occurrences of `name`, backed by the symbol DB's
    /// identifier table (AST-validated, not a text-search fallback).
    pub fn find_occurrences(&self, name: &str, case_sensitive: bool) -> CoreResult<Vec<IdentifierOccurrence>> {
        let conn = self.symbols_conn.lock().map_err(|_| CoreError::Internal("symbols db lock poisoned".into()))?;
        let (sql, bind): (&str, String) = if case_sensitive {
            (
                "SELECT name, role, file_path, start_line, end_line, start_column, end_column, start_byte, end_byte \
                 FROM identifier_occurrences WHERE name = ?1 ORDER BY file_path ASC, start_line ASC",
                name.to_string(),
            )
        } else {
            (
                "SELECT name, role, file_path, start_line, end_line, start_column, end_column, start_byte, end_byte \
                 FROM identifier_occurrences WHERE LOWER(name) = LOWER(?1) ORDER BY file_path ASC, start_line ASC",
                name.to_string(),
            )
        };
        let mut stmt = conn.prepare(sql).map_err(|e| CoreError::Internal(e.to_string()))?;
        let rows = stmt
            .query_map(params![bind], |row| {
                Ok(IdentifierOccurrence {
                    name: row.get(0)?,
                    role: parse_reference_role(&row.get::<_, String>(1)?),
                    file_path: row.get(2)?,
                    start_line: row.get::<_, i64>(3)? as usize,
                    end_line: row.get::<_, i64>(4)? as usize,
                    start_column: row.get::<_, i64>(5)? as usize,
                    end_column: row.get::<_, i64>(6)? as usize,
                    start_byte: row.get::<_, i64>(7)? as usize,
                    end_byte: row.get::<_, i64>(8)? as usize,
                })
            })
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(|e| CoreError::Internal(e.to_string()))
    }

    /// The single best-matching symbol definition for `name` (exact match,
    /// first by file path then start line), used by the refactor executor's
    /// extract/move/interface operations.
    pub fn get_symbol_definition(&self, name: &str) -> CoreResult<Option<Symbol>> {
        let symbols = self.get_symbols_by_name(name, true)?;
        Ok(symbols.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scanned(dir: &Path, rel: &str, content: &str) -> ScannedFile {
        let abs = dir.join(rel);
        fs::write(&abs, content).unwrap();
        ScannedFile { rel_path: rel.to_string(), abs_path: abs, ext: "rs".into(), size: content.len() as u64, last_modified: 0 }
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let handle1 = open(dir.path()).unwrap();
        drop(handle1);
        let handle2 = open(dir.path());
        assert!(handle2.is_ok());
        assert!(exists(dir.path()));
    }

    #[test]
    fn index_and_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = scanned(dir.path(), "lib.rs", "fn getUserById(id: u32) -> u32 { id }");
        let handle = open(dir.path()).unwrap();
        let ast_index = crate::ast::build_ast_index(&[file.clone()]);
        handle.index_files(&[file], &ast_index, &[]).unwrap();

        let result = handle.search("getUserById", 10, true).unwrap();
        assert!(result.total >= 1);
        assert_eq!(result.hits[0].path, "lib.rs");
    }

    #[test]
    fn symbol_lookup_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = scanned(dir.path(), "lib.rs", "pub fn helper() {}\n");
        let handle = open(dir.path()).unwrap();
        let ast_index = crate::ast::build_ast_index(&[file.clone()]);
        handle.index_files(&[file], &ast_index, &[]).unwrap();

        let symbols = handle.get_symbols_by_name("helper", true).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].visibility, Visibility::Public);
    }

    #[test]
    fn recent_files_respects_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let file = ScannedFile {
            rel_path: "old.rs".into(),
            abs_path: dir.path().join("old.rs"),
            ext: "rs".into(),
            size: 0,
            last_modified: 100,
        };
        fs::write(&file.abs_path, "").unwrap();
        let handle = open(dir.path()).unwrap();
        let ast_index = crate::ast::build_ast_index(&[file.clone()]);
        handle.index_files(&[file], &ast_index, &[]).unwrap();

        assert!(handle.get_recent_files(200, 10, None).unwrap().is_empty());
        assert_eq!(handle.get_recent_files(50, 10, None).unwrap().len(), 1);
    }

    #[test]
    fn find_occurrences_returns_recorded_references() {
        let dir = tempfile::tempdir().unwrap();
        let file = scanned(dir.path(), "lib.rs", "fn helper() {}\n");
        let handle = open(dir.path()).unwrap();
        let ast_index = crate::ast::build_ast_index(&[file.clone()]);
        let occ = IdentifierOccurrence {
            name: "helper".into(),
            role: ReferenceRole::Call,
            file_path: "lib.rs".into(),
            start_line: 3,
            end_line: 3,
            start_column: 1,
            end_column: 7,
            start_byte: 20,
            end_byte: 26,
        };
        handle.index_files(&[file], &ast_index, &[occ]).unwrap();

        let found = handle.find_occurrences("helper", true).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].role, ReferenceRole::Call);
    }

    #[test]
    fn code_tokenizer_splits_camel_case() {
        let tokens = split_code_identifiers("getUserById");
        let words: Vec<String> = tokens.into_iter().map(|t| t.text).collect();
        assert_eq!(words, vec!["get", "user", "by", "id"]);
    }

    #[test]
    fn semantic_search_unavailable_without_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let handle = open(dir.path()).unwrap();
        let err = handle.search_symbols_semantic("foo", 5).unwrap_err();
        assert!(matches!(err, CoreError::SemanticUnavailable));
    }
}
