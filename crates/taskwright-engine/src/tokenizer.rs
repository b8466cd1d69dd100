//! Stream Tokenizer (C1): a forward, byte-oriented scanner over the LLM's
//! raw text chunks. It does not interpret tag contents — it only
//! recognizes the small table of top-level tags the dialect defines (§6.3)
//! well enough to know where a tool block starts and ends, so that
//! generation can be suspended for the stop-and-wait invariant.
//!
//! Deliberately not a general XML parser (see Design Notes §9): memory is
//! bounded by a single block-size cap, and correctness only depends on
//! finding tag boundaries, not on understanding what's inside them.

use crate::error::TokenizeError;

/// One token emitted by the Tokenizer, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    /// Plain prose (including `<think>...</think>` spans, which are
    /// forwarded verbatim — the Session records them as thought steps).
    Text(String),
    /// The opening tag of a tool block was reached.
    ToolBlockStart(String),
    /// The tool block closed; `raw_block` is the complete block including
    /// its opening tag and the `<execute_tools />` terminator.
    ToolBlockEnd(String),
    /// A closed `<answer>...</answer>` block; payload is the inner text.
    AnswerBlock(String),
    /// The underlying stream ended without a terminator.
    StreamEnd,
}

const MAX_BLOCK_BYTES: usize = 64 * 1024;
const WRAPPER_TAGS: [&str; 2] = ["parallel", "sequential"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Answer,
    ToolBlock,
}

/// Incremental tokenizer driven by feeding it one chunk at a time.
pub struct Tokenizer {
    mode: Mode,
    /// Text accumulated since the last flushed event, used to look for the
    /// next tag boundary across chunk seams.
    buffer: String,
    /// The complete tool block accumulated since `ToolBlockStart`.
    block_buffer: String,
    wrapper_depth: usize,
    ended: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            mode: Mode::Text,
            buffer: String::new(),
            block_buffer: String::new(),
            wrapper_depth: 0,
            ended: false,
        }
    }

    /// Feed one chunk of text from the LLM. Returns every event that could
    /// be resolved from the data seen so far; a chunk may straddle a tag
    /// boundary and yield nothing until more data arrives.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<TokenEvent>, TokenizeError> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        loop {
            match self.mode {
                Mode::Text => {
                    if !self.advance_text(&mut events)? {
                        break;
                    }
                }
                Mode::Answer => {
                    if !self.advance_answer(&mut events) {
                        break;
                    }
                }
                Mode::ToolBlock => {
                    if !self.advance_tool_block(&mut events)? {
                        break;
                    }
                }
            }
        }
        Ok(events)
    }

    /// Signal that the underlying stream has ended. Flushes any remaining
    /// buffered text and emits `StreamEnd`.
    pub fn finish(&mut self) -> Vec<TokenEvent> {
        let mut events = Vec::new();
        if self.ended {
            return events;
        }
        self.ended = true;
        if !self.buffer.is_empty() {
            events.push(TokenEvent::Text(std::mem::take(&mut self.buffer)));
        }
        events.push(TokenEvent::StreamEnd);
        events
    }

    /// Looks for the next recognized top-level open tag in `self.buffer`.
    /// Returns `Ok(true)` if it made progress (consumed some text and
    /// should be called again), `Ok(false)` if it needs more input.
    fn advance_text(&mut self, events: &mut Vec<TokenEvent>) -> Result<bool, TokenizeError> {
        let Some(lt) = self.buffer.find('<') else {
            // No tag at all yet; flush everything except a possible
            // trailing partial tag start is impossible here since there's
            // no '<' — flush it all.
            if !self.buffer.is_empty() {
                events.push(TokenEvent::Text(std::mem::take(&mut self.buffer)));
            }
            return Ok(false);
        };

        // Flush text preceding the tag.
        if lt > 0 {
            let text: String = self.buffer.drain(..lt).collect();
            events.push(TokenEvent::Text(text));
        }

        // Need the closing '>' of the opening tag to know its name.
        let Some(gt) = self.buffer.find('>') else {
            return Ok(false); // wait for more data
        };
        let raw_tag = self.buffer[..=gt].to_string();
        let name = tag_name(&raw_tag);

        match name.as_str() {
            "answer" => {
                self.buffer.drain(..=gt);
                self.mode = Mode::Answer;
                self.block_buffer.clear();
                Ok(true)
            }
            "execute_tools" => {
                // Legacy open form: `<execute_tools>` wrapping the block.
                if raw_tag.trim_end().ends_with("/>") {
                    // A bare self-closing `<execute_tools />` with no
                    // preceding recognized tag is spurious; drop it as text.
                    self.buffer.drain(..=gt);
                    events.push(TokenEvent::Text(raw_tag));
                    Ok(true)
                } else {
                    events.push(TokenEvent::ToolBlockStart(raw_tag.clone()));
                    self.block_buffer = raw_tag;
                    self.buffer.drain(..=gt);
                    self.wrapper_depth = 0;
                    self.mode = Mode::ToolBlock;
                    Ok(true)
                }
            }
            "think" | "result" | "" => {
                // `<think>` passes through as plain text (verbatim);
                // `<result>` is never emitted by the model and is treated
                // as inert text if it somehow appears; an empty/odd tag
                // name is just forwarded.
                let text: String = self.buffer.drain(..=gt).collect();
                events.push(TokenEvent::Text(text));
                Ok(true)
            }
            _ => {
                // Any other bareword tag opens a potential Single/Parallel/
                // Sequential invocation — the start of a tool block.
                events.push(TokenEvent::ToolBlockStart(raw_tag.clone()));
                self.block_buffer = raw_tag;
                self.buffer.drain(..=gt);
                self.wrapper_depth = if WRAPPER_TAGS.contains(&name.as_str()) { 1 } else { 0 };
                self.mode = Mode::ToolBlock;
                Ok(true)
            }
        }
    }

    fn advance_answer(&mut self, events: &mut Vec<TokenEvent>) -> bool {
        let Some(end) = self.buffer.find("</answer>") else {
            return false;
        };
        let inner = self.buffer[..end].to_string();
        self.buffer.drain(..end + "</answer>".len());
        events.push(TokenEvent::AnswerBlock(inner));
        self.mode = Mode::Text;
        true
    }

    fn advance_tool_block(&mut self, events: &mut Vec<TokenEvent>) -> Result<bool, TokenizeError> {
        // Look for the next tag so we can track wrapper nesting and find
        // the terminator.
        let Some(lt) = self.buffer.find('<') else {
            if self.block_buffer.len() + self.buffer.len() > MAX_BLOCK_BYTES {
                return Err(TokenizeError::BlockTooLarge(MAX_BLOCK_BYTES));
            }
            self.block_buffer.push_str(&self.buffer);
            self.buffer.clear();
            return Ok(false);
        };

        let Some(gt) = self.buffer[lt..].find('>').map(|i| i + lt) else {
            return Ok(false); // wait for more data to resolve this tag
        };

        let consumed: String = self.buffer.drain(..=gt).collect();
        self.block_buffer.push_str(&consumed);
        if self.block_buffer.len() > MAX_BLOCK_BYTES {
            return Err(TokenizeError::BlockTooLarge(MAX_BLOCK_BYTES));
        }

        let raw_tag = &consumed[lt..];
        let name = tag_name(raw_tag);
        let self_closing = raw_tag.trim_end().ends_with("/>");
        let is_close = raw_tag.starts_with("</");

        if name == "execute_tools" {
            // Terminator: either `<execute_tools />` or `</execute_tools>`.
            let block = std::mem::take(&mut self.block_buffer);
            events.push(TokenEvent::ToolBlockEnd(block));
            self.mode = Mode::Text;
            self.wrapper_depth = 0;
            return Ok(true);
        }

        if WRAPPER_TAGS.contains(&name.as_str()) && !self_closing {
            if is_close {
                self.wrapper_depth = self.wrapper_depth.saturating_sub(1);
            } else {
                self.wrapper_depth += 1;
                if self.wrapper_depth > 1 {
                    return Err(TokenizeError::NestingTooDeep);
                }
            }
        }

        Ok(true)
    }
}

fn tag_name(raw_tag: &str) -> String {
    let trimmed = raw_tag.trim_start_matches('<').trim_start_matches('/');
    let trimmed = trimmed.trim_end_matches("/>").trim_end_matches('>');
    trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(tok: &mut Tokenizer, chunks: &[&str]) -> Vec<TokenEvent> {
        let mut out = Vec::new();
        for c in chunks {
            out.extend(tok.feed(c).unwrap());
        }
        out
    }

    #[test]
    fn plain_text_passes_through() {
        let mut tok = Tokenizer::new();
        let events = feed_all(&mut tok, &["hello world"]);
        assert_eq!(events, vec![TokenEvent::Text("hello world".to_string())]);
    }

    #[test]
    fn single_invocation_produces_start_and_end() {
        let mut tok = Tokenizer::new();
        let block = "<microsandbox><execute_python>print(1)</execute_python></microsandbox>";
        let events = feed_all(&mut tok, &[block, "<execute_tools />"]);
        assert_eq!(events.len(), 2);
        match &events[0] {
            TokenEvent::ToolBlockStart(tag) => assert_eq!(tag, "<microsandbox>"),
            other => panic!("unexpected: {:?}", other),
        }
        match &events[1] {
            TokenEvent::ToolBlockEnd(raw) => {
                assert!(raw.starts_with("<microsandbox>"));
                assert!(raw.ends_with("<execute_tools />"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn split_across_chunks_still_resolves() {
        let mut tok = Tokenizer::new();
        let events = feed_all(
            &mut tok,
            &["<micro", "sandbox><execute_python>x", "</execute_python></microsandbox>", "<exe", "cute_tools />"],
        );
        assert!(events.iter().any(|e| matches!(e, TokenEvent::ToolBlockStart(_))));
        assert!(events.iter().any(|e| matches!(e, TokenEvent::ToolBlockEnd(_))));
    }

    #[test]
    fn answer_block_closes_cleanly() {
        let mut tok = Tokenizer::new();
        let events = feed_all(&mut tok, &["<answer>42</answer>"]);
        assert_eq!(events, vec![TokenEvent::AnswerBlock("42".to_string())]);
    }

    #[test]
    fn legacy_execute_tools_open_form() {
        let mut tok = Tokenizer::new();
        let events = feed_all(
            &mut tok,
            &["<execute_tools><microsandbox><execute_python>1</execute_python></microsandbox></execute_tools>"],
        );
        assert!(matches!(events[0], TokenEvent::ToolBlockStart(_)));
        assert!(matches!(events.last().unwrap(), TokenEvent::ToolBlockEnd(_)));
    }

    #[test]
    fn nested_wrapper_is_rejected() {
        let mut tok = Tokenizer::new();
        let result = tok.feed("<parallel><parallel><a><b>c</b></a></parallel></parallel>");
        assert!(matches!(result, Err(TokenizeError::NestingTooDeep)));
    }

    #[test]
    fn oversized_block_is_rejected() {
        let mut tok = Tokenizer::new();
        tok.feed("<server>").unwrap();
        let huge = "x".repeat(MAX_BLOCK_BYTES + 1);
        let result = tok.feed(&huge);
        assert!(matches!(result, Err(TokenizeError::BlockTooLarge(_))));
    }

    #[test]
    fn finish_flushes_trailing_text_and_ends() {
        let mut tok = Tokenizer::new();
        tok.feed("trailing thought").unwrap();
        let events = tok.finish();
        assert_eq!(
            events,
            vec![
                TokenEvent::Text("trailing thought".to_string()),
                TokenEvent::StreamEnd
            ]
        );
    }
}
