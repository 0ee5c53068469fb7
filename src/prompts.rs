//! Centralized prompt and message definitions
//!
//! Round 1 asks for an independent analysis of the article text. Rounds 2
//! and later ask the model to cross-verify the baseline result and every
//! earlier verification against the article. A comparison item gets a
//! round-1 prompt holding both of its articles. Prompts are a pure function
//! of the item state, so replaying the same history yields the same prompt.
//!
//! User-facing progress and failure messages live here too.

use chrono::{DateTime, FixedOffset, Utc};

use crate::store::{FactCheckContext, NewsItem};
use crate::verdict::{AnalysisResult, Verdict, VerdictLabel};

/// Placeholder for a field the model did not provide.
const MISSING: &str = "N/A";

/// Compared article excerpts are cut to this many characters.
const EXCERPT_CHARS: usize = 300;

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Output contract shared by every round.
const OUTPUT_RULES: &str = r#"## 출력 형식
다음 JSON 배열 형식으로만 응답하십시오. JSON 외의 문장, 주석, 코드 블록은 포함하지 마십시오.

**텍스트 포맷팅 규칙:**
- 줄바꿈: <br> 태그
- 강조: **텍스트**
- 리스트: - 항목 또는 1. 항목"#;

/// Round-1 instructions: analyze the text on its own terms.
const ANALYSIS_ROLE: &str = r#"## 역할
당신은 주어진 기사 텍스트의 **논리적 구조, 근거 제시 방식, 표현의 적절성**만을 분석하는 **'뉴스 텍스트 분석가'**입니다.
외부 세계의 사실이나 사전 지식과 비교하지 말고 오직 주어진 텍스트 자체만을 평가하십시오.

### 단계적 분석
1. 기사 구조 이해하기: 제목, 리드문, 핵심 주장, 기사 장르(속보/일반기사/칼럼/인터뷰/탐사보도)
2. 근거 확인하기: 각 주장의 근거와 출처의 구체성
3. 논리적 연결 검토하기: 근거와 결론 사이의 비약이나 생략
4. 표현 방식 평가하기: 감정 유발 단어, 단정적이거나 선동적인 표현
5. 오탐 방지 점검하기: 전문 용어, 장르 특성, 인용문과 기자 주장의 구분
6. 종합 판단하기: 가장 심각한 문제를 기준으로 최종 판단

불확실하면 보수적으로 판단하십시오."#;

/// Round-2 instructions: first cross-verification of the baseline.
const CROSS_CHECK_ROLE: &str = r#"## 역할
당신은 **'AI 분석 검증 전문가'**입니다. 다른 AI가 수행한 뉴스 분석 결과를 재검토하고, 오류나 과도한 판단이 있는지 교차 검증하십시오.

### 교차 검증 원칙
1. 독립적 재평가: 1차 분석 결과에 영향받지 않고 원문을 다시 평가
2. 오판 가능성 점검: 1차 분석이 놓친 맥락이나 과도한 판단 확인
3. 근거의 타당성 재검토: 제시된 근거가 실제로 원문에 존재하는지 검증
4. False Positive 방지: 정상적인 기사를 거짓으로 오판하지 않았는지 주의
5. 최종 균형 판단: 1차 분석과 재평가를 종합하여 신중한 결론 도출"#;

/// Round-3+ instructions: cumulative re-verification.
const RECURSIVE_ROLE: &str = r#"## 역할
당신은 **'재귀적 검증 전문가'**입니다. 이전 AI의 검증 결과들을 모두 검토하여 판단의 정확도를 더욱 높이십시오.

### 재귀적 검증 원칙
1. 원문 기반 재평가: 항상 원문을 기준점으로 이전 검증들을 확인
2. 1차 분석 참조: 초기 분석의 관점을 염두에 두되 맹신하지 않기
3. 이전 검증의 맹점 탐색: 직전 검증이 놓친 세부사항 재검토
4. 점진적 정밀화: 판단의 근거와 논리를 단계마다 정교하게 다듬기
5. 과잉 수정 방지: 이전 검증이 타당하다면 뒤집지 않고 보강만 하기"#;

/// Instructions for weighing two articles against each other.
const COMPARISON_ROLE: &str = r#"## 역할
당신은 두 뉴스 기사를 대조하는 **'뉴스 비교분석 전문가'**입니다. 같은 사안을 다룬 두 기사의 사실 관계와 관점 차이를 체계적으로 분석하십시오.

### 단계적 비교분석
1. 기본 정보 파악: 각 기사의 주제, 발생 시점, 등장 인물과 기관
2. 핵심 주장 비교: 두 기사가 공통으로 전달하는 내용과 서로 다른 내용
3. 사실 정보 대조: 수치, 날짜, 인용문 등 검증 가능한 정보의 일치 여부
4. 관점과 프레이밍: 제목, 강조점, 표현 방식에서 드러나는 시각 차이
5. 근거와 출처: 각 기사가 제시한 근거의 구체성과 출처의 신뢰성
6. 종합 신뢰도: 차이의 심각성을 기준으로 두 기사의 신뢰도 판단

### 비교분석 원칙
- 단순한 표현 차이와 사실 관계의 차이를 구분하십시오.
- 한 기사에만 있는 정보는 누락으로, 서로 다른 정보는 상충으로 구분하십시오.
- 외부 사전 지식이 아니라 두 기사 텍스트만을 근거로 판단하십시오.
- 불확실하면 보수적으로 판단하십시오."#;

fn label_choices() -> String {
    VerdictLabel::CLOSED_SET
        .iter()
        .map(|label| format!("'{}'", label.as_str()))
        .collect::<Vec<_>>()
        .join(" / ")
}

fn output_schema(instruction: &str, label_hint: &str, with_opinion: bool) -> String {
    let opinion = if with_opinion {
        ",\n      \"검증의견\": \"이전 결과와 비교하여 달라진 점, 보완된 점, 또는 동의하는 이유\""
    } else {
        ""
    };
    format!(
        r#"[
  {{
    "instruction": "{instruction}",
    "output": {{
      "진위": "{label_hint} ({choices}만 사용. 다른 표현 금지)",
      "근거": "판단의 근거를 <br>로 구분하여 나열",
      "분석": "**✨ 기사 개요**<br>...<br><br>**📊 주요 분석 결과**<br>...<br><br>**⚠️ 검증 한계**<br>...<br><br>**⚖️ 종합 판단**<br>...",
      "요약": "핵심 결론을 간결하게 요약",
      "수상한문장": {{"기사 원문의 문장": "의심스러운 이유"}}{opinion}
    }}
  }}
]"#,
        choices = label_choices(),
    )
}

/// `**[현재 시각: ...]**` line anchored on when the run started.
pub fn date_context(started_at: DateTime<Utc>) -> String {
    let formatted = FixedOffset::east_opt(KST_OFFSET_SECS)
        .map(|kst| {
            started_at
                .with_timezone(&kst)
                .format("%Y년 %m월 %d일 %H:%M (KST)")
                .to_string()
        })
        .unwrap_or_else(|| started_at.format("%Y-%m-%d %H:%M (UTC)").to_string());
    format!("**[현재 시각: {}]**", formatted)
}

fn article_text(item: &NewsItem) -> String {
    format!("{}\n{}", item.title, item.content)
}

/// Round-1 prompt: the article only.
pub fn analysis_prompt(item: &NewsItem, started_at: DateTime<Utc>) -> String {
    let schema = output_schema(
        "해당 기사는 진위 여부 판단을 목적으로 수집되었습니다. 종합적으로 검토 후 판단 결과를 항목별로 출력하세요.",
        "판단 결과",
        false,
    );
    format!(
        "{date}\n\n{ANALYSIS_ROLE}\n\n---\n\n{OUTPUT_RULES}\n\n{schema}\n\n---\n\n[뉴스 기사 본문]\n{article}\n---",
        date = date_context(started_at),
        article = article_text(item),
    )
}

/// Round-1 prompt of a comparison item: both articles side by side, plus
/// whatever result each side already had.
pub fn comparison_prompt(item: &NewsItem, started_at: DateTime<Utc>) -> String {
    let prior = item
        .comparison
        .as_ref()
        .map(|comparison| {
            [(1, &comparison.source), (2, &comparison.target)]
                .into_iter()
                .filter_map(|(index, side)| {
                    side.result.as_ref().map(|result| {
                        format!("[비교 대상 {index} 기존 분석 결과]\n{}", render_result(result, false))
                    })
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let prior = if prior.is_empty() {
        String::new()
    } else {
        format!("\n{}\n\n---\n", prior.join("\n---\n"))
    };

    format!(
        r#"{date}

{COMPARISON_ROLE}

---

{OUTPUT_RULES}

[
  {{
    "instruction": "아래 두 뉴스 기사를 비교분석하여 사실 관계의 일치 여부와 신뢰도를 항목별로 출력하세요.",
    "output": {{
      "분석진행": "단계적 비교분석 과정을 <br>로 구분하여 요약",
      "진위": "두 기사를 종합한 판단 결과 ({choices}만 사용. 다른 표현 금지)",
      "근거": "일치하는 사실과 차이가 나는 사실을 <br>로 구분하여 나열",
      "분석": "**📰 공통 내용**<br>...<br><br>**🔀 차이점**<br>...<br><br>**🎯 관점과 프레이밍**<br>...<br><br>**⚖️ 종합 판단**<br>...",
      "요약": "비교 결론을 간결하게 요약"
    }}
  }}
]

---
{prior}
[비교분석 대상 뉴스]
{article}
---"#,
        date = date_context(started_at),
        choices = label_choices(),
        article = article_text(item),
    )
}

/// Prompt for round `round` (>= 2) of `total`, built from the baseline
/// and every verification committed after it.
pub fn cross_verification_prompt(
    item: &NewsItem,
    baseline: &AnalysisResult,
    previous: &[AnalysisResult],
    round: u32,
    total: u32,
    started_at: DateTime<Utc>,
) -> String {
    let fact_check = item
        .fact_check
        .as_ref()
        .map(fact_check_section)
        .unwrap_or_default();
    let baseline_text = render_result(baseline, false);

    if previous.is_empty() {
        let schema = output_schema(
            "아래는 동일한 기사에 대한 1차 AI 분석 결과입니다. 이를 참고하되, 원문을 독립적으로 재평가하여 최종 판단을 내리세요.",
            "교차 검증 후 최종 판단",
            true,
        );
        return format!(
            "{date}\n\n{CROSS_CHECK_ROLE}\n\n**현재 진행 상황: {round}/{total}차 검증**\n\n---\n\n{OUTPUT_RULES}\n\n{schema}\n\n---\n\n[원문 기사]\n{article}\n{fact_check}\n[1차 AI 분석 결과]\n{baseline_text}\n\n---\n\n**[검증 요청]**\n위 1차 분석 결과를 원문 기사와 대조하여 재검증해주세요.\n---",
            date = date_context(started_at),
            article = article_text(item),
        );
    }

    let count = previous.len();
    let history = previous
        .iter()
        .enumerate()
        .map(|(index, result)| {
            format!(
                "[{}차 검증 결과]\n{}",
                index + 2,
                render_result(result, true)
            )
        })
        .collect::<Vec<_>>()
        .join("\n---\n");
    let schema = output_schema(
        &format!(
            "아래는 동일한 기사에 대한 1차 분석 및 {count}개의 검증 결과입니다. 원문을 기준점으로 모든 결과를 누적 검토하여 더 정확한 판단을 내리세요."
        ),
        &format!("{round}차 재귀적 검증 후 최종 판단"),
        true,
    );

    format!(
        "{date}\n\n{RECURSIVE_ROLE}\n\n**현재 진행 상황: {round}/{total}차 검증**\n**참고 자료: 원문 + 1차 분석 + {count}개의 이전 검증 결과**\n\n---\n\n{OUTPUT_RULES}\n\n{schema}\n\n---\n\n[원문 기사]\n{article}\n{fact_check}\n[1차 AI 분석 결과 (기준점)]\n{baseline_text}\n\n---\n\n{history}\n\n---\n\n**[검증 요청]**\n위 원문, 1차 분석, 그리고 {count}개의 이전 검증 결과를 모두 종합하여 {round}차 재검증을 수행해주세요.\n원문을 최우선 기준점으로 삼아주세요.\n---",
        date = date_context(started_at),
        article = article_text(item),
    )
}

/// Prompt for the next round of `item`, derived from its committed state.
///
/// Returns `None` for round 2+ when no baseline exists yet.
pub fn round_prompt(item: &NewsItem, round: u32, total: u32) -> Option<String> {
    let started_at = item.analysis_started_at.unwrap_or(item.created_at);
    if round <= 1 {
        return Some(if item.is_comparison() {
            comparison_prompt(item, started_at)
        } else {
            analysis_prompt(item, started_at)
        });
    }

    let baseline = item.baseline_analysis.as_ref()?;
    let committed = (round as usize - 1).min(item.verification_history.len());
    let previous = item
        .verification_history
        .get(1..committed)
        .unwrap_or_default();
    Some(cross_verification_prompt(
        item, baseline, previous, round, total, started_at,
    ))
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.is_empty()).unwrap_or(MISSING)
}

/// Render one round's result as prompt context.
pub fn render_result(result: &AnalysisResult, with_opinion: bool) -> String {
    let verdict = match result {
        AnalysisResult::Structured(verdict) => verdict.clone(),
        AnalysisResult::Raw(text) => Verdict::default().analysis(text.clone()),
    };

    let mut lines = vec![
        format!("진위: {}", field(&verdict.label)),
        format!("근거: {}", field(&verdict.justification)),
        format!("분석: {}", field(&verdict.analysis)),
        format!("요약: {}", field(&verdict.summary)),
    ];
    if with_opinion {
        lines.push(format!("검증의견: {}", field(&verdict.verification_opinion)));
    }
    lines.join("\n")
}

/// External comparison section, empty when there are no articles.
pub fn fact_check_section(context: &FactCheckContext) -> String {
    if context.articles.is_empty() {
        return String::new();
    }

    let articles = context
        .articles
        .iter()
        .enumerate()
        .map(|(index, article)| {
            let body = match &article.crawled_content {
                Some(content) => format!(
                    "- 핵심 내용: {}...",
                    content.chars().take(EXCERPT_CHARS).collect::<String>()
                ),
                None => "- 본문: (크롤링 실패)".to_string(),
            };
            format!(
                "**비교 기사 {}:**\n- 제목: {}\n- 출처: {}\n- 요약: {}\n{}",
                index + 1,
                article.title,
                article.display_link,
                article.snippet,
                body
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let verification = context.verification.as_ref();
    let count = |key: &str| {
        verification
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_array())
            .map(Vec::len)
            .unwrap_or(0)
    };
    let assessment = verification
        .and_then(|v| v.get("종합_평가"))
        .and_then(|v| v.as_str())
        .unwrap_or(MISSING);

    format!(
        "\n---\n\n[사실 검증 결과 (외부 기사 비교)]\n\n**검증된 기사 수: {}개**\n\n{}\n\n**AI 비교 검증 결과:**\n- ✅ 일치: {}개\n- ❌ 불일치: {}개\n- 평가: {}\n\n**[참고]** 위 검증 결과는 교차 검증 시 참고만 하세요.\n\n---\n",
        context.articles.len(),
        articles,
        count("일치하는_사실"),
        count("불일치하는_사실"),
        assessment
    )
}

/// Progress messages shown before the round-1 request, with the pause
/// after each one in milliseconds.
pub const INITIAL_PROGRESS: [(&str, u64); 4] = [
    ("🔍 API 연결 및 인증 확인 중...", 300),
    ("📝 기사 내용 파싱 및 분석 준비 중...", 500),
    ("🤖 Gemini AI에 팩트체킹 요청 전송 중...", 800),
    ("⚡ AI가 기사의 신뢰성을 검증하고 있습니다...", 0),
];

/// Progress messages shown before round `round` of `total`.
pub fn round_progress(round: u32, total: u32) -> [String; 4] {
    [
        format!("🔄 {round}/{total}차 검증 준비 중..."),
        format!("🧐 {round}/{total}차 재검토 수행 중..."),
        format!("🔍 {round}/{total}차 교차 검증 중..."),
        format!("⚡ {round}/{total}차 메타인지적 재평가 중..."),
    ]
}

pub const MSG_COMPLETED: &str = "✅ 분석이 완료되었습니다.";
pub const MSG_CANCELLED: &str = "🛑 사용자에 의해 분석이 중지되었습니다.";
pub const MSG_MISSING_KEY: &str = "⚠️ API 키가 설정되지 않았습니다. 설정에서 Gemini API 키를 입력해 주세요.";
pub const MSG_QUOTA: &str =
    "⚠️ API 사용량 한도를 초과했습니다. 잠시 후 다시 시도하거나 요금제를 확인해 주세요.";

/// Timeout message naming the budget in minutes.
pub fn timeout_message(timeout_minutes: u64) -> String {
    format!(
        "⏱️ 분석 시간이 초과되었습니다 ({}분). 네트워크 상태를 확인한 후 다시 시도해 주세요.",
        timeout_minutes
    )
}

/// Failure message for a transport error.
pub fn transport_message(detail: &str) -> String {
    format!("❌ 분석 중 오류가 발생했습니다: {}", detail)
}
