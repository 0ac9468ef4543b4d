//! Incremental demultiplexer for engine output.
//!
//! The engine writes one text stream in which tool calls and reasoning are
//! wrapped in `[TOOL]...[/TOOL]` and `[THINKING]...[/THINKING]` markers. A
//! segment may span many lines, so text is accumulated until both markers are
//! present. Anything outside a segment is forwarded as soon as its line
//! arrives; only text from an unclosed opening marker onwards is held back.

use std::ops::Range;

use tracing::debug;

use gemini_relay_core::protocol::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Tool,
    Thinking,
}

impl Segment {
    const ALL: [Segment; 2] = [Segment::Tool, Segment::Thinking];

    fn open(self) -> &'static str {
        match self {
            Segment::Tool => "[TOOL]",
            Segment::Thinking => "[THINKING]",
        }
    }

    fn close(self) -> &'static str {
        match self {
            Segment::Tool => "[/TOOL]",
            Segment::Thinking => "[/THINKING]",
        }
    }

    fn frame(self, content: &str) -> Frame {
        let content = content.trim().to_string();
        match self {
            Segment::Tool => Frame::ToolOutput { content },
            Segment::Thinking => Frame::ThinkingOutput { content },
        }
    }
}

/// A complete segment found in the buffer.
struct Match {
    segment: Segment,
    /// Markers plus content.
    outer: Range<usize>,
    /// Content between the markers.
    inner: Range<usize>,
}

/// Per-stream classifier state. Feed it lines with [`push`](Self::push).
#[derive(Debug)]
pub struct OutputClassifier {
    buffer: String,
    max_buffer: usize,
}

impl OutputClassifier {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buffer: String::new(),
            max_buffer,
        }
    }

    /// Bytes currently held back.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Append a chunk of output and return the frames it completes, in the
    /// order their text appeared.
    pub fn push(&mut self, chunk: &str) -> Vec<Frame> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(found) = self.next_segment() {
            frames.push(found.segment.frame(&self.buffer[found.inner]));
            self.buffer.replace_range(found.outer, "");
        }

        match self.pending_open() {
            Some(hold) if self.buffer.len() <= self.max_buffer => {
                if !self.buffer[..hold].trim().is_empty() {
                    let plain: String = self.buffer.drain(..hold).collect();
                    frames.push(Frame::GeminiOutput { content: plain });
                }
            }
            Some(_) => {
                debug!(
                    held = self.buffer.len(),
                    limit = self.max_buffer,
                    "Unterminated segment exceeded buffer cap, flushing as plain output"
                );
                frames.push(Frame::GeminiOutput {
                    content: std::mem::take(&mut self.buffer),
                });
            }
            None if !self.buffer.trim().is_empty() => {
                frames.push(Frame::GeminiOutput {
                    content: std::mem::take(&mut self.buffer),
                });
            }
            None if self.buffer.len() > self.max_buffer => {
                debug!(
                    held = self.buffer.len(),
                    limit = self.max_buffer,
                    "Whitespace-only output exceeded buffer cap, flushing"
                );
                frames.push(Frame::GeminiOutput {
                    content: std::mem::take(&mut self.buffer),
                });
            }
            None => {}
        }

        frames
    }

    /// End of stream: whatever is still held is dropped. Returns the number
    /// of discarded bytes.
    pub fn finish(self) -> usize {
        let discarded = self.buffer.len();
        if !self.buffer.trim().is_empty() {
            debug!(discarded, "Discarding unterminated output at end of stream");
        }
        discarded
    }

    /// The earliest complete segment of either kind.
    fn next_segment(&self) -> Option<Match> {
        Segment::ALL
            .into_iter()
            .filter_map(|segment| self.find_segment(segment))
            .min_by_key(|m| m.outer.start)
    }

    fn find_segment(&self, segment: Segment) -> Option<Match> {
        let start = self.buffer.find(segment.open())?;
        let content_start = start + segment.open().len();
        let content_end = content_start + self.buffer[content_start..].find(segment.close())?;
        Some(Match {
            segment,
            outer: start..content_end + segment.close().len(),
            inner: content_start..content_end,
        })
    }

    /// Position of the earliest opening marker that is still waiting for its
    /// closing marker.
    fn pending_open(&self) -> Option<usize> {
        Segment::ALL
            .into_iter()
            .filter_map(|segment| self.buffer.find(segment.open()))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 64 * 1024;

    fn tool(s: &str) -> Frame {
        Frame::ToolOutput { content: s.into() }
    }

    fn thinking(s: &str) -> Frame {
        Frame::ThinkingOutput { content: s.into() }
    }

    fn plain(s: &str) -> Frame {
        Frame::GeminiOutput { content: s.into() }
    }

    #[test]
    fn test_plain_lines_pass_through_immediately() {
        let mut c = OutputClassifier::new(CAP);
        assert_eq!(c.push("Hello there\n"), vec![plain("Hello there\n")]);
        assert_eq!(c.push("second line\n"), vec![plain("second line\n")]);
        assert!(c.buffered().is_empty());
    }

    #[test]
    fn test_inline_tool_segment() {
        let mut c = OutputClassifier::new(CAP);
        let frames = c.push("Hello [TOOL]ls -la[/TOOL] world");
        assert_eq!(frames, vec![tool("ls -la"), plain("Hello  world")]);
        assert!(c.buffered().is_empty());
    }

    #[test]
    fn test_multiline_tool_segment_is_held_until_closed() {
        let mut c = OutputClassifier::new(CAP);
        assert_eq!(c.push("[TOOL]\n"), vec![]);
        assert_eq!(c.push("read_file src/main.rs\n"), vec![]);
        assert_eq!(c.buffered(), "[TOOL]\nread_file src/main.rs\n");

        let frames = c.push("[/TOOL]\n");
        assert_eq!(frames, vec![tool("read_file src/main.rs")]);
        // Only the trailing newline is left, and whitespace is never emitted alone.
        assert_eq!(c.buffered(), "\n");
    }

    #[test]
    fn test_text_before_unclosed_marker_is_not_withheld() {
        let mut c = OutputClassifier::new(CAP);
        let frames = c.push("Working on it [THINKING]first I\n");
        assert_eq!(frames, vec![plain("Working on it ")]);
        assert_eq!(c.buffered(), "[THINKING]first I\n");

        let frames = c.push("should read the file[/THINKING] done\n");
        assert_eq!(
            frames,
            vec![
                thinking("first I\nshould read the file"),
                plain(" done\n")
            ]
        );
    }

    #[test]
    fn test_interleaved_tool_and_thinking() {
        let mut c = OutputClassifier::new(CAP);
        let frames = c.push("a [THINKING] plan [/THINKING] b [TOOL] run [/TOOL] c\n");
        assert_eq!(
            frames,
            vec![thinking("plan"), tool("run"), plain("a  b  c\n")]
        );
    }

    #[test]
    fn test_several_segments_of_one_kind() {
        let mut c = OutputClassifier::new(CAP);
        let frames = c.push("[TOOL]one[/TOOL][TOOL]two[/TOOL]\n");
        assert_eq!(frames, vec![tool("one"), tool("two")]);
        assert_eq!(c.buffered(), "\n");
    }

    #[test]
    fn test_segment_content_never_leaks_into_plain_output() {
        let mut c = OutputClassifier::new(CAP);
        let mut frames = Vec::new();
        for line in ["intro\n", "[TOOL] git\n", "status [/TOOL]\n", "outro\n"] {
            frames.extend(c.push(line));
        }
        assert_eq!(
            frames,
            vec![plain("intro\n"), tool("git\nstatus"), plain("\noutro\n")]
        );
        let leaked = frames.iter().any(|f| match f {
            Frame::GeminiOutput { content } => content.contains("git") || content.contains("status"),
            _ => false,
        });
        assert!(!leaked);
    }

    #[test]
    fn test_nested_markers_first_match_wins() {
        let mut c = OutputClassifier::new(CAP);
        let frames = c.push("[TOOL] x [THINKING] y [/THINKING] z [/TOOL]\n");
        assert_eq!(frames, vec![tool("x [THINKING] y [/THINKING] z")]);
    }

    #[test]
    fn test_whitespace_only_is_kept_for_next_output() {
        let mut c = OutputClassifier::new(CAP);
        assert_eq!(c.push("\n"), vec![]);
        assert_eq!(c.push("  \n"), vec![]);
        assert_eq!(c.push("text\n"), vec![plain("\n  \ntext\n")]);
    }

    #[test]
    fn test_blank_lines_respect_buffer_cap() {
        let mut c = OutputClassifier::new(64);
        let mut flushed = Vec::new();
        for _ in 0..1_000 {
            flushed.extend(c.push("   \n"));
            assert!(c.buffered().len() <= 64);
        }
        assert!(!flushed.is_empty());
        let emitted: usize = flushed
            .iter()
            .map(|f| match f {
                Frame::GeminiOutput { content } => {
                    assert!(content.trim().is_empty());
                    content.len()
                }
                other => panic!("unexpected frame {other:?}"),
            })
            .sum();
        assert_eq!(emitted + c.buffered().len(), 4_000);
    }

    #[test]
    fn test_unterminated_segment_is_discarded_at_end() {
        let mut c = OutputClassifier::new(CAP);
        assert_eq!(c.push("[TOOL] never closed\n"), vec![]);
        assert_eq!(c.finish(), "[TOOL] never closed\n".len());
    }

    #[test]
    fn test_buffer_cap_flushes_unterminated_segment() {
        let mut c = OutputClassifier::new(32);
        assert_eq!(c.push("[THINKING] short\n"), vec![]);
        let frames = c.push("this line pushes the held text past the cap\n");
        assert_eq!(
            frames,
            vec![plain(
                "[THINKING] short\nthis line pushes the held text past the cap\n"
            )]
        );
        assert!(c.buffered().is_empty());
    }

    #[test]
    fn test_closing_marker_without_opening_is_plain() {
        let mut c = OutputClassifier::new(CAP);
        assert_eq!(c.push("stray [/TOOL]\n"), vec![plain("stray [/TOOL]\n")]);
    }
}
