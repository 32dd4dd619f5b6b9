//! Citation Assembler - 검색 결과 → 번호 붙은 컨텍스트 + 인용 맵
//!
//! 번호는 검색 순위 그대로 1..=n 이고, 컨텍스트 문자열의 줄 순서와 같습니다.

use std::collections::BTreeMap;

use serde::Serialize;

use super::record::Chunk;
use super::retriever::QueryResult;
use super::vector::ScoreOrder;

/// 인용 하나
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub number: usize,
    /// 외부 URL 우선, 없으면 로컬 파일
    pub link: String,
    pub score: f32,
    pub score_order: ScoreOrder,
    pub chunk: Chunk,
}

impl Citation {
    /// 위치 표시 (`page=3, para=1`)
    pub fn anchor(&self) -> String {
        let page = self
            .chunk
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let para = self
            .chunk
            .paragraph_id
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!("page={}, para={}", page, para)
    }

    /// 미리보기 (최대 `max_chars`자, 줄바꿈은 공백으로)
    pub fn snippet(&self, max_chars: usize) -> String {
        let flat = flatten_newlines(&self.chunk.text);
        if flat.chars().count() <= max_chars {
            return flat;
        }
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

/// 번호 붙은 컨텍스트와 인용 맵
#[derive(Debug, Clone, Default, Serialize)]
pub struct CitedContext {
    /// `"[i] <text>"` 줄들
    pub context: String,
    pub citations: BTreeMap<usize, Citation>,
}

impl CitedContext {
    /// 검색 결과 조립 (입력 순서 = 순위)
    pub fn assemble(results: &[QueryResult]) -> Self {
        let mut context = String::new();
        let mut citations = BTreeMap::new();

        for (i, result) in results.iter().enumerate() {
            let number = i + 1;
            context.push_str(&format!("[{}] {}\n", number, flatten_newlines(&result.chunk.text)));

            citations.insert(
                number,
                Citation {
                    number,
                    link: result.chunk.display_link().to_string(),
                    score: result.score,
                    score_order: result.score_order,
                    chunk: result.chunk.clone(),
                },
            );
        }

        Self { context, citations }
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }
}

/// 답변 생성용 프롬프트
///
/// 컨텍스트만 근거로 답하고 사실에는 `[n]` 번호로 인용하도록 지시합니다.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a helpful AI assistant. Use only the provided context to answer the query.\n\
         If multiple parts of the context are relevant, combine them into a detailed explanation in clear, natural language.\n\
         Cite sources with inline numbers [1], [2] only when referencing specific facts.\n\
         Do not start answers with phrases like \"Based on the provided text.\"\n\
         Always provide as much useful detail as the context allows.\n\
         \n\
         Query: {}\n\
         \n\
         Context:\n\
         {}\n\
         Answer:\n",
        query, context
    )
}

fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", " ").replace('\n', " ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::record::{ChunkStrategy, SourceRecord};

    fn results(n: usize) -> Vec<QueryResult> {
        (0..n)
            .map(|i| {
                let mut record = SourceRecord::new(format!("doc{}.pdf", i), "doc", "");
                if i % 2 == 0 {
                    record.source_url = Some(format!("https://x/doc{}.pdf", i));
                }
                record.page = Some(i as u32 + 1);
                QueryResult {
                    rank: i + 1,
                    id: 100 + i,
                    score: i as f32 * 0.1,
                    score_order: ScoreOrder::LowerIsBetter,
                    chunk: Chunk::from_record(
                        &record,
                        0,
                        format!("chunk {}\nsecond line", i),
                        ChunkStrategy::Sentence,
                    ),
                }
            })
            .collect()
    }

    #[test]
    fn test_numbering_matches_context_order() {
        for k in [1, 3, 5, 10] {
            let cited = CitedContext::assemble(&results(k));

            assert_eq!(cited.len(), k);
            let lines: Vec<&str> = cited.context.lines().collect();
            assert_eq!(lines.len(), k);

            for (i, line) in lines.iter().enumerate() {
                let number = i + 1;
                assert_eq!(*line, format!("[{}] chunk {} second line", number, i));

                let citation = &cited.citations[&number];
                assert_eq!(citation.number, number);
                assert_eq!(citation.chunk.text, format!("chunk {}\nsecond line", i));
            }

            let keys: Vec<usize> = cited.citations.keys().copied().collect();
            assert_eq!(keys, (1..=k).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_link_prefers_url() {
        let cited = CitedContext::assemble(&results(2));
        assert_eq!(cited.citations[&1].link, "https://x/doc0.pdf");
        assert_eq!(cited.citations[&2].link, "doc1.pdf");
    }

    #[test]
    fn test_empty_results() {
        let cited = CitedContext::assemble(&[]);
        assert!(cited.is_empty());
        assert!(cited.context.is_empty());
    }

    #[test]
    fn test_anchor_and_snippet() {
        let cited = CitedContext::assemble(&results(1));
        let citation = &cited.citations[&1];

        assert_eq!(citation.anchor(), "page=1, para=-");
        assert_eq!(citation.snippet(7), "chunk 0...");
        assert_eq!(citation.snippet(400), "chunk 0 second line");
    }

    #[test]
    fn test_prompt_contains_query_and_context() {
        let cited = CitedContext::assemble(&results(2));
        let prompt = build_prompt("What is doc one?", &cited.context);

        assert!(prompt.contains("Query: What is doc one?"));
        assert!(prompt.contains("Context:\n[1] chunk 0 second line\n[2] chunk 1 second line\n"));
        assert!(prompt.contains("[1], [2]"));
        assert!(prompt.trim_end().ends_with("Answer:"));
    }
}
