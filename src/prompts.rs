//! Prompts for exam generation.
//!
//! Centralising every prompt here keeps wording changes in one place and lets
//! unit tests inspect prompts directly without an LLM.
//!
//! Callers can override the system instruction via
//! [`crate::config::RelayConfig::system_prompt`]; the user template is fixed.

/// Default system instruction, used when `RelayConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "你是一位樂於助人的AI助理，專門從教材內容生成Markdown格式的試卷，並可選擇性地展示你的思考過程。";

/// Instruction used when the caller submits an empty query.
pub const DEFAULT_USER_QUERY: &str = "請根據提供的課本內容，生成一份包含5道選擇題和2道簡答題的綜合測驗卷，選擇題需有四個選項，並請提供所有題目的正確答案。";

/// Build the user message embedding the document text and the instruction.
///
/// `text` must already be truncated to the context budget.
pub fn exam_prompt(text: &str, instruction: &str) -> String {
    format!(
        r#"你是一位專業的教學內容設計師，擅長根據提供的教材內容和使用者要求生成試卷。
在生成試卷之前，你可以先進行思考，將你的思考步驟或分析過程放在 <think> 和 </think> 標籤之間（如果適用）。
然後，請嚴格按照 Markdown 格式輸出試卷題目，每道題目應包含題幹、必要的選項（如選擇題），並在題目後明確標示答案。

提供的課本內容如下：
---
{text}
---

使用者的要求如下：
"{instruction}"

請開始生成試卷 (思考過程可選)：
"#
    )
}
