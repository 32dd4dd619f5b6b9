//! CLI 모듈
//!
//! citerag 명령어 정의 및 구현
//! ingest → split → index 순서로 단계 파일을 만들고, query / ask로 검색합니다.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::collector::{CollectionStats, FileCollector};
use crate::embedding::{create_embedder, EmbeddingProvider, PoolConfig, DEFAULT_DIMENSION};
use crate::error::RagError;
use crate::extractor::{Normalizer, UrlMap};
use crate::gemini::has_api_key;
use crate::generation::{AnswerGenerator, GeminiGenerator};
use crate::knowledge::{
    build_prompt, get_data_dir, read_jsonl, write_jsonl, Backend, BuildOptions, Chunk,
    ChunkConfig, CitedContext, DocumentChunker, IndexBuilder, IndexSnapshot, IndexStore, Metric,
    QueryResult, Retriever, SharedIndex, SourceRecord, DEFAULT_TOP_K, MAX_TOP_K, MIN_TOP_K,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "citerag")]
#[command(version, about = "인용 기반 로컬 RAG 파이프라인", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: $CITERAG_HOME 또는 로컬 데이터 폴더/.citerag)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 원본 문서(PDF, DOCX, HTML, MD)를 레코드로 정규화
    Ingest {
        /// 입력 파일 또는 폴더 (기본: <data-dir>/raw)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// 레코드 출력 파일 (기본: <data-dir>/records.jsonl)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// 파일 이름 → URL 맵 (기본: <data-dir>/url_map.json)
        #[arg(long)]
        url_map: Option<PathBuf>,
    },

    /// 레코드를 검색 단위 청크로 분할
    Split {
        /// 레코드 파일 (기본: <data-dir>/records.jsonl)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// 청크 출력 파일 (기본: <data-dir>/chunks.jsonl)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// 청크 최대 단어 수
        #[arg(long, default_value_t = 800)]
        chunk_size: usize,

        /// 인접 청크 오버랩 단어 수
        #[arg(long, default_value_t = 200)]
        overlap: usize,

        /// 의미 경계 임계값 (1 - 코사인 유사도)
        #[arg(long, default_value_t = 0.45)]
        semantic_threshold: f32,

        /// 의미 분할 끄기 (API 호출 없음)
        #[arg(long)]
        no_semantic: bool,
    },

    /// 청크를 임베딩하여 새 인덱스 빌드 후 게시
    Index {
        /// 청크 파일 (기본: <data-dir>/chunks.jsonl)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// 거리 측정 (l2 | cosine)
        #[arg(long, default_value = "l2")]
        metric: Metric,

        /// 인덱스 백엔드 (flat | lance)
        #[arg(long, default_value = "flat")]
        backend: Backend,

        /// 임베딩 차원 (768, 1536, 3072)
        #[arg(long, default_value_t = DEFAULT_DIMENSION)]
        dimension: usize,

        /// 동시 임베딩 호출 수
        #[arg(long, default_value_t = 8)]
        concurrency: usize,

        /// 호출당 타임아웃 (초)
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,

        /// 보관할 빌드 수 (현재 빌드 포함)
        #[arg(long, default_value_t = 3)]
        keep: usize,
    },

    /// 인덱스 검색 (top-k 청크와 점수)
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (1-10)
        #[arg(short, default_value_t = DEFAULT_TOP_K)]
        k: usize,
    },

    /// 검색 결과를 근거로 인용 포함 답변 생성
    Ask {
        /// 질문 (생략하면 대화형 모드)
        query: Option<String>,

        /// 근거 청크 개수 (1-10)
        #[arg(short, default_value_t = DEFAULT_TOP_K)]
        k: usize,

        /// 생성 모델
        #[arg(long)]
        model: Option<String>,
    },

    /// 상태 확인
    Status,
}

/// 데이터 디렉토리 기준 기본 경로
struct Paths {
    data_dir: PathBuf,
}

impl Paths {
    fn new(data_dir: Option<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.unwrap_or_else(get_data_dir),
        }
    }

    fn raw(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    fn records(&self) -> PathBuf {
        self.data_dir.join("records.jsonl")
    }

    fn chunks(&self) -> PathBuf {
        self.data_dir.join("chunks.jsonl")
    }

    fn url_map(&self) -> PathBuf {
        self.data_dir.join("url_map.json")
    }

    fn index_store(&self) -> IndexStore {
        IndexStore::new(self.data_dir.join("index"))
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let paths = Paths::new(cli.data_dir);

    match cli.command {
        Commands::Ingest { input, out, url_map } => {
            cmd_ingest(
                input.unwrap_or_else(|| paths.raw()),
                out.unwrap_or_else(|| paths.records()),
                url_map.unwrap_or_else(|| paths.url_map()),
            )
            .await
        }
        Commands::Split {
            input,
            out,
            chunk_size,
            overlap,
            semantic_threshold,
            no_semantic,
        } => {
            let config = ChunkConfig {
                chunk_size,
                chunk_overlap: overlap,
                semantic_threshold,
            };
            cmd_split(
                input.unwrap_or_else(|| paths.records()),
                out.unwrap_or_else(|| paths.chunks()),
                config,
                no_semantic,
            )
            .await
        }
        Commands::Index {
            input,
            metric,
            backend,
            dimension,
            concurrency,
            timeout_secs,
            keep,
        } => {
            let options = BuildOptions {
                metric,
                backend,
                pool: PoolConfig {
                    concurrency,
                    call_timeout: Duration::from_secs(timeout_secs),
                },
            };
            cmd_index(
                input.unwrap_or_else(|| paths.chunks()),
                &paths.index_store(),
                options,
                dimension,
                keep,
            )
            .await
        }
        Commands::Query { query, k } => cmd_query(&query, k, paths.index_store()).await,
        Commands::Ask { query, k, model } => {
            cmd_ask(query, k, model, paths.index_store()).await
        }
        Commands::Status => cmd_status(&paths).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 정규화 명령어 (ingest)
async fn cmd_ingest(input: PathBuf, out: PathBuf, url_map: PathBuf) -> Result<()> {
    let url_map = UrlMap::load(&url_map).context("URL 맵 로드 실패")?;
    let files = FileCollector::with_defaults()
        .collect(&input)
        .context("파일 수집 실패")?;

    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다: {}", input.display());
        return Ok(());
    }

    let stats = CollectionStats::from_files(&files);
    println!("[*] 정규화 대상: {} 파일", stats.total_files);
    println!(
        "    PDF: {}, DOCX: {}, HTML: {}, MD: {}",
        stats.pdf_files, stats.docx_files, stats.html_files, stats.markdown_files
    );
    println!("    총 크기: {}", format_bytes(stats.total_size as usize));
    println!("    URL 맵: {} 항목", url_map.len());
    println!();

    let normalizer = Normalizer::new(url_map);
    let mut records: Vec<SourceRecord> = Vec::new();
    let mut success_count = 0;
    let mut error_count = 0;

    for (i, file) in files.iter().enumerate() {
        print!(
            "[{}/{}] [{}] {}... ",
            i + 1,
            files.len(),
            file.file_type.label(),
            file.file_name()
        );
        std::io::stdout().flush().ok();

        match normalizer.normalize(file).await {
            Ok(file_records) => {
                println!("완료 ({} 레코드)", file_records.len());
                records.extend(file_records);
                success_count += 1;
            }
            Err(e) => {
                println!("실패: {:#}", e);
                error_count += 1;
            }
        }
    }

    let written = write_jsonl(&out, &records).context("레코드 저장 실패")?;

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);
    println!("     {} 레코드 → {}", written, out.display());

    Ok(())
}

/// 청킹 명령어 (split)
async fn cmd_split(
    input: PathBuf,
    out: PathBuf,
    config: ChunkConfig,
    no_semantic: bool,
) -> Result<()> {
    let mut chunker = DocumentChunker::new(config)?;

    if !no_semantic {
        require_api_key("의미 분할을 끄려면 --no-semantic 을 사용하세요.")?;
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(create_embedder(DEFAULT_DIMENSION)?);
        chunker = chunker.with_embedder(embedder, PoolConfig::default());
    }

    let records: Vec<SourceRecord> = read_jsonl(&input)
        .with_context(|| format!("레코드 파일 읽기 실패: {}", input.display()))?;

    println!("[*] {} 레코드 분할 중...", records.len());

    let chunks = chunker.chunk_records(&records).await;
    let written = write_jsonl(&out, &chunks).context("청크 저장 실패")?;

    let mut by_strategy: BTreeMap<&str, usize> = BTreeMap::new();
    for chunk in &chunks {
        *by_strategy.entry(chunk.strategy.as_str()).or_insert(0) += 1;
    }

    println!("[OK] {} 청크 → {}", written, out.display());
    for (strategy, count) in by_strategy {
        println!("     {}: {}", strategy, count);
    }

    Ok(())
}

/// 인덱스 빌드 명령어 (index)
async fn cmd_index(
    input: PathBuf,
    store: &IndexStore,
    options: BuildOptions,
    dimension: usize,
    keep: usize,
) -> Result<()> {
    require_api_key("")?;

    let chunks: Vec<Chunk> = read_jsonl(&input)
        .with_context(|| format!("청크 파일 읽기 실패: {}", input.display()))?;

    if chunks.is_empty() {
        bail!("청크가 없습니다: {} (split 을 먼저 실행하세요)", input.display());
    }

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(create_embedder(dimension)?);

    println!(
        "[*] {} 청크 임베딩 및 인덱스 빌드 중... (metric: {}, backend: {})",
        chunks.len(),
        options.metric.as_str(),
        options.backend.as_str()
    );

    let manifest = IndexBuilder::new(embedder, options)
        .build(&chunks, store)
        .await
        .context("인덱스 빌드 실패")?;

    let build_dir = store.current_build_dir()?;
    println!("[OK] 인덱스 게시됨: {}", build_dir.display());
    println!(
        "     벡터: {}, 차원: {}, 원본 파일: {}",
        manifest.count, manifest.dimension, manifest.sources
    );

    if keep > 0 {
        let removed = store.prune(keep)?;
        if removed > 0 {
            println!("     이전 빌드 {} 개 정리", removed);
        }
    }

    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(query: &str, k: usize, store: IndexStore) -> Result<()> {
    check_top_k(k)?;
    require_api_key("")?;

    let shared = SharedIndex::new(store);
    let retriever = open_retriever(&shared).await?;

    println!("[*] 검색 중: \"{}\"", query);

    let results = retriever.search(query, k).await.context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());
    for result in &results {
        print_result(result);
    }

    Ok(())
}

/// 답변 명령어 (ask)
async fn cmd_ask(
    query: Option<String>,
    k: usize,
    model: Option<String>,
    store: IndexStore,
) -> Result<()> {
    check_top_k(k)?;
    require_api_key("")?;

    let generator = GeminiGenerator::from_env(model.as_deref())?;
    let shared = SharedIndex::new(store);
    let mut retriever = open_retriever(&shared).await?;

    if let Some(query) = query {
        return answer(&retriever, &generator, &query, k).await;
    }

    println!(
        "[*] 대화형 모드 (모델: {}, 인덱스: {} 청크)",
        generator.model(),
        retriever.snapshot().len()
    );
    println!("    :reload 최신 인덱스로 교체, :quit 종료");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n질문> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            ":quit" | ":q" | ":exit" => break,
            ":reload" => match shared.reload().await {
                Ok(snapshot) => {
                    println!(
                        "[OK] 인덱스 교체: {} ({} 청크)",
                        snapshot.build_dir().display(),
                        snapshot.len()
                    );
                    retriever = retriever_for(snapshot)?;
                }
                Err(e) => println!("[!] 다시 로드 실패 (기존 인덱스 유지): {:#}", e),
            },
            query => {
                if let Err(e) = answer(&retriever, &generator, query, k).await {
                    println!("[!] 실패: {:#}", e);
                }
            }
        }
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(paths: &Paths) -> Result<()> {
    println!("citerag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", paths.data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    for (label, path) in [("레코드", paths.records()), ("청크", paths.chunks())] {
        match count_lines(&path) {
            Some(count) => println!("[OK] {}: {} 건 ({})", label, count, path.display()),
            None => println!("[!] {}: 없음 ({})", label, path.display()),
        }
    }

    let store = paths.index_store();
    match IndexSnapshot::load(&store).await {
        Ok(snapshot) => {
            let manifest = snapshot.manifest();
            println!("[OK] 인덱스: {}", snapshot.build_dir().display());
            println!(
                "     백엔드: {}, metric: {}, 차원: {}",
                manifest.backend.as_str(),
                manifest.metric.as_str(),
                manifest.dimension
            );
            println!(
                "     청크: {}, 원본 파일: {}, 모델: {}",
                manifest.count, manifest.sources, manifest.embedding_model
            );
            println!(
                "     생성: {}",
                manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!(
                "     디스크 사용량: {}",
                format_bytes(store.disk_usage() as usize)
            );
        }
        Err(e) => match e.downcast_ref::<RagError>() {
            Some(RagError::IndexUnavailable { .. }) => {
                println!("[!] 인덱스: 없음 (index 명령으로 빌드하세요)");
            }
            _ => println!("[!] 인덱스 로드 실패: {:#}", e),
        },
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// API 키가 없으면 작업 전에 중단
fn require_api_key(hint: &str) -> Result<()> {
    if has_api_key() {
        return Ok(());
    }

    let mut message = String::from(
        "API 키가 설정되지 않았습니다.\n\n\
         설정 방법:\n  \
         export GEMINI_API_KEY=your-api-key\n  \
         또는\n  \
         export GOOGLE_AI_API_KEY=your-api-key\n\n\
         API 키 발급: https://aistudio.google.com/app/apikey",
    );
    if !hint.is_empty() {
        message.push_str("\n\n");
        message.push_str(hint);
    }
    Err(anyhow::Error::new(RagError::MissingApiKey).context(message))
}

fn check_top_k(k: usize) -> Result<()> {
    if !(MIN_TOP_K..=MAX_TOP_K).contains(&k) {
        return Err(RagError::InvalidTopK {
            k,
            min: MIN_TOP_K,
            max: MAX_TOP_K,
        }
        .into());
    }
    Ok(())
}

async fn open_retriever(shared: &SharedIndex) -> Result<Retriever> {
    let snapshot = shared
        .get()
        .await
        .context("인덱스를 열 수 없습니다 (index 명령으로 빌드하세요)")?;
    retriever_for(snapshot)
}

/// 스냅샷의 차원과 같은 임베더로 검색기 생성
fn retriever_for(snapshot: Arc<IndexSnapshot>) -> Result<Retriever> {
    let embedder = create_embedder(snapshot.manifest().dimension)?;
    if embedder.name() != snapshot.manifest().embedding_model {
        tracing::warn!(
            "Index was built with {}, querying with {}",
            snapshot.manifest().embedding_model,
            embedder.name()
        );
    }
    Ok(Retriever::new(snapshot, Arc::new(embedder)))
}

/// 검색 → 인용 컨텍스트 → 답변 출력
async fn answer(
    retriever: &Retriever,
    generator: &dyn AnswerGenerator,
    query: &str,
    k: usize,
) -> Result<()> {
    let results = retriever.search(query, k).await.context("검색 실패")?;
    let cited = CitedContext::assemble(&results);

    if cited.is_empty() {
        println!("[!] 관련 문서를 찾지 못했습니다.");
        return Ok(());
    }

    let prompt = build_prompt(query, &cited.context);
    let reply = generator.generate(&prompt).await.context("답변 생성 실패")?;

    println!("\n{}\n", reply.trim());
    println!("출처:");
    for citation in cited.citations.values() {
        println!(
            "  [{}] {} ({}) - {}",
            citation.number,
            citation.link,
            citation.anchor(),
            citation.snippet(80)
        );
    }

    Ok(())
}

fn print_result(result: &QueryResult) {
    let chunk = &result.chunk;
    println!(
        "{}. [{}: {:.4}] #{} {}",
        result.rank,
        result.score_order.label(),
        result.score,
        result.id,
        chunk.strategy
    );
    println!("   제목: {}", chunk.title);
    println!("   출처: {}", chunk.display_link());
    if let Some(page) = chunk.page {
        println!("   페이지: {}", page);
    }
    if let Some(section) = chunk.table.section.as_deref() {
        println!("   섹션: {}", section);
    }
    println!("   내용: {}", truncate_text(&chunk.text, 200));
    println!();
}

/// 비어 있지 않은 줄 수 (파일이 없으면 None)
fn count_lines(path: &Path) -> Option<usize> {
    let raw = std::fs::read_to_string(path).ok()?;
    Some(raw.lines().filter(|l| !l.trim().is_empty()).count())
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_index_options() {
        let cli = Cli::try_parse_from([
            "citerag",
            "--data-dir",
            "/tmp/rag",
            "index",
            "--metric",
            "cosine",
            "--backend",
            "lance",
        ])
        .unwrap();

        assert_eq!(cli.data_dir.as_deref(), Some(Path::new("/tmp/rag")));
        match cli.command {
            Commands::Index {
                metric,
                backend,
                concurrency,
                ..
            } => {
                assert_eq!(metric, Metric::Cosine);
                assert_eq!(backend, Backend::Lance);
                assert_eq!(concurrency, 8);
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn test_parse_query_default_k() {
        let cli = Cli::try_parse_from(["citerag", "query", "refund policy"]).unwrap();
        match cli.command {
            Commands::Query { query, k } => {
                assert_eq!(query, "refund policy");
                assert_eq!(k, DEFAULT_TOP_K);
            }
            _ => panic!("expected query command"),
        }

        assert!(Cli::try_parse_from(["citerag", "index", "--metric", "dot"]).is_err());
    }

    #[test]
    fn test_check_top_k() {
        assert!(check_top_k(1).is_ok());
        assert!(check_top_k(10).is_ok());

        let err = check_top_k(11).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidTopK { k: 11, .. })
        ));
        assert!(check_top_k(0).is_err());
    }

    #[test]
    fn test_default_paths() {
        let paths = Paths::new(Some(PathBuf::from("/data")));
        assert_eq!(paths.records(), PathBuf::from("/data/records.jsonl"));
        assert_eq!(paths.chunks(), PathBuf::from("/data/chunks.jsonl"));
        assert_eq!(paths.index_store().root(), Path::new("/data/index"));
    }

    #[test]
    fn test_count_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        std::fs::write(&path, "{}\n\n{}\n").unwrap();

        assert_eq!(count_lines(&path), Some(2));
        assert_eq!(count_lines(&dir.path().join("missing.jsonl")), None);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }
}
