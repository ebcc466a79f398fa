// src/console/display.rs
//
// Display sink for the console. Device output is printed above the prompt
// line, which is then redrawn with whatever the user has typed so far.

use crossterm::{
    cursor::{MoveTo, MoveToColumn},
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use super::prompt::LineEditor;

/// Where console text goes. Implementations serialise concurrent writes.
pub trait DisplaySink: Send + Sync {
    /// Informational text such as banners and notices (sync intent).
    fn write_sync(&self, text: &str);

    /// One decoded line of device output (async intent).
    fn write_line_async(&self, line: &str);

    /// Stop drawing the prompt. Called when the session starts draining.
    fn finish(&self) {}
}

// ============================================================================
// Colours
// ============================================================================

/// Parse `#RRGGBB` into a terminal colour
pub fn parse_colour(s: &str) -> Option<Color> {
    let hex = s.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color::Rgb { r, g, b })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    pub prompt: Color,
    pub input: Color,
    pub async_output: Color,
    pub sync_output: Color,
}

impl Palette {
    /// Build from `#RRGGBB` strings; unparseable entries use the terminal default.
    pub fn from_hex(prompt: &str, input: &str, async_output: &str, sync_output: &str) -> Self {
        let colour = |name: &str, value: &str| {
            parse_colour(value).unwrap_or_else(|| {
                tlog!("[display] Ignoring invalid {} colour '{}'", name, value);
                Color::Reset
            })
        };
        Palette {
            prompt: colour("prompt", prompt),
            input: colour("input", input),
            async_output: colour("async output", async_output),
            sync_output: colour("sync output", sync_output),
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::from_hex("#00ff66", "#1642C7", "#ED7621", "#7542f5")
    }
}

// ============================================================================
// Terminal Console
// ============================================================================

struct ScreenState {
    editor: LineEditor,
    prompt_shown: bool,
}

/// The interactive terminal: owns the prompt line and prints device output
/// above it.
pub struct TerminalConsole {
    prompt: String,
    palette: Palette,
    state: Mutex<ScreenState>,
}

impl TerminalConsole {
    pub fn new(prompt: impl Into<String>, palette: Palette) -> Self {
        TerminalConsole {
            prompt: prompt.into(),
            palette,
            state: Mutex::new(ScreenState {
                editor: LineEditor::new(),
                prompt_shown: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScreenState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Draw the prompt (and any pending input) on the current line.
    pub fn show_prompt(&self) {
        let mut state = self.lock();
        state.prompt_shown = true;
        self.paint(|out| render_prompt(out, &self.prompt, &self.palette, &state.editor));
    }

    pub fn redraw(&self) {
        let state = self.lock();
        if state.prompt_shown {
            self.paint(|out| render_prompt(out, &self.prompt, &self.palette, &state.editor));
        }
    }

    /// Run an edit against the prompt line and redraw it.
    pub fn edit<R>(&self, f: impl FnOnce(&mut LineEditor) -> R) -> R {
        let mut state = self.lock();
        let result = f(&mut state.editor);
        if state.prompt_shown {
            self.paint(|out| render_prompt(out, &self.prompt, &self.palette, &state.editor));
        }
        result
    }

    /// Take the submitted line. The echoed input stays on screen and the
    /// prompt is drawn again on the next line by the next `show_prompt`.
    pub fn submit_line(&self) -> String {
        let mut state = self.lock();
        let line = state.editor.take_line();
        state.prompt_shown = false;
        self.paint(|out| queue!(out, Print("\r\n")));
        line
    }

    /// Clear the whole screen and redraw the prompt at the top.
    pub fn clear_screen(&self) {
        let state = self.lock();
        self.paint(|out| {
            queue!(out, Clear(ClearType::Purge), Clear(ClearType::All), MoveTo(0, 0))?;
            if state.prompt_shown {
                render_prompt(out, &self.prompt, &self.palette, &state.editor)?;
            }
            Ok(())
        });
    }

    /// Write to stdout. Display failures are not session errors.
    fn paint(&self, f: impl FnOnce(&mut std::io::StdoutLock<'static>) -> std::io::Result<()>) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = f(&mut out).and_then(|_| out.flush()) {
            tlog!("[display] Terminal write failed: {}", e);
        }
    }

    fn print_above_prompt(&self, lines: &[&str], colour: Color) {
        let state = self.lock();
        self.paint(|out| {
            if state.prompt_shown {
                queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            }
            for line in lines {
                render_line(out, line, colour)?;
            }
            if state.prompt_shown {
                render_prompt(out, &self.prompt, &self.palette, &state.editor)?;
            }
            Ok(())
        });
    }
}

impl DisplaySink for TerminalConsole {
    fn write_sync(&self, text: &str) {
        let text = text.replace('\r', "");
        let lines: Vec<&str> = text.trim_end_matches('\n').split('\n').collect();
        self.print_above_prompt(&lines, self.palette.sync_output);
    }

    fn write_line_async(&self, line: &str) {
        let line = line.replace('\r', "");
        self.print_above_prompt(&[line.as_str()], self.palette.async_output);
    }

    fn finish(&self) {
        let mut state = self.lock();
        if state.prompt_shown {
            state.prompt_shown = false;
            self.paint(|out| queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine)));
        }
    }
}

/// One coloured line. Raw mode needs the explicit carriage return, also
/// for any bare LF left inside the line.
fn render_line(out: &mut impl Write, line: &str, colour: Color) -> std::io::Result<()> {
    for row in line.split('\n') {
        queue!(
            out,
            SetForegroundColor(colour),
            Print(row),
            ResetColor,
            Print("\r\n")
        )?;
    }
    Ok(())
}

fn render_prompt(
    out: &mut impl Write,
    prompt: &str,
    palette: &Palette,
    editor: &LineEditor,
) -> std::io::Result<()> {
    let column = prompt.chars().count() + editor.cursor();
    queue!(
        out,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        SetForegroundColor(palette.prompt),
        Print(prompt),
        SetForegroundColor(palette.input),
        Print(editor.text()),
        ResetColor,
        MoveToColumn(column.min(u16::MAX as usize) as u16)
    )
}

#[cfg(test)]
mod tests {
    use super::super::prompt::EditAction;
    use super::*;

    #[test]
    fn test_parse_colour() {
        assert_eq!(
            parse_colour("#ED7621"),
            Some(Color::Rgb {
                r: 0xED,
                g: 0x76,
                b: 0x21
            })
        );
        assert_eq!(parse_colour(" #00ff66 "), Some(Color::Rgb { r: 0, g: 0xff, b: 0x66 }));
        assert_eq!(parse_colour("00ff66"), None);
        assert_eq!(parse_colour("#00ff6"), None);
        assert_eq!(parse_colour("#00gg66"), None);
    }

    #[test]
    fn test_palette_falls_back_to_default_colour() {
        let palette = Palette::from_hex("green", "#1642C7", "#ED7621", "#7542f5");
        assert_eq!(palette.prompt, Color::Reset);
        assert_eq!(palette.input, Color::Rgb { r: 0x16, g: 0x42, b: 0xC7 });
    }

    #[test]
    fn test_render_prompt_shows_input() {
        let mut editor = LineEditor::new();
        for c in "ping".chars() {
            editor.apply(EditAction::Insert(c));
        }

        let mut out = Vec::new();
        render_prompt(&mut out, "> ", &Palette::default(), &editor).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("> "));
        assert!(text.contains("ping"));
    }

    #[test]
    fn test_render_line_ends_with_crlf() {
        let mut out = Vec::new();
        render_line(&mut out, "hello", Color::Reset).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("hello"));
        assert!(text.ends_with("\r\n"));
    }

    #[test]
    fn test_render_line_returns_carriage_on_embedded_lf() {
        let mut out = Vec::new();
        render_line(&mut out, "a\nb", Color::Reset).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains('a') && text.contains('b'));
        assert_eq!(text.matches("\r\n").count(), 2);
        assert_eq!(text.matches('\n').count(), 2);
        assert!(text.find('a') < text.find("\r\n"));
    }
}
