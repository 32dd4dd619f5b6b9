//! citerag CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // .env 가 있으면 API 키 등 환경변수 로드
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("[!] .env 로드 실패: {}", e);
        }
    }

    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = citerag::cli::Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(citerag::cli::run(cli))
}
