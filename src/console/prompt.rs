// src/console/prompt.rs
//
// Interactive line input: a small raw-mode line editor driven by crossterm
// key events. Editing state lives in the shared `TerminalConsole` so device
// output can redraw the prompt, and so a cancelled `read_line` loses nothing.

use async_trait::async_trait;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use futures::StreamExt;
use std::sync::Arc;

use super::display::TerminalConsole;

// ============================================================================
// Input Service
// ============================================================================

/// Result of waiting for one line of user input
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// A submitted line, without its terminator
    Line(String),
    /// Ctrl+C
    Interrupt,
    /// End of input (Ctrl+D on an empty line, or the event stream ended)
    Eof,
}

/// Supplies one line of text per call. Implementations must be cancel-safe:
/// dropping a pending `read_line` future loses no typed input.
#[async_trait]
pub trait LineInput: Send {
    async fn read_line(&mut self) -> std::io::Result<InputEvent>;
}

// ============================================================================
// Key Handling
// ============================================================================

/// What a key press asks the editor to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditAction {
    Insert(char),
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
    HistoryPrev,
    HistoryNext,
    Submit,
    Interrupt,
    EndOfInput,
    ClearScreen,
    Ignore,
}

pub fn classify_key(key: &KeyEvent) -> EditAction {
    if key.kind == KeyEventKind::Release {
        return EditAction::Ignore;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => EditAction::Interrupt,
            KeyCode::Char('d') => EditAction::EndOfInput,
            KeyCode::Char('r') => EditAction::ClearScreen,
            KeyCode::Char('a') => EditAction::Home,
            KeyCode::Char('e') => EditAction::End,
            _ => EditAction::Ignore,
        };
    }

    match key.code {
        KeyCode::Enter => EditAction::Submit,
        KeyCode::Backspace => EditAction::Backspace,
        KeyCode::Delete => EditAction::Delete,
        KeyCode::Left => EditAction::Left,
        KeyCode::Right => EditAction::Right,
        KeyCode::Home => EditAction::Home,
        KeyCode::End => EditAction::End,
        KeyCode::Up => EditAction::HistoryPrev,
        KeyCode::Down => EditAction::HistoryNext,
        KeyCode::Char(c) => EditAction::Insert(c),
        _ => EditAction::Ignore,
    }
}

// ============================================================================
// Line Editor
// ============================================================================

/// Buffer, cursor and in-memory history of the prompt line
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: Vec<char>,
    cursor: usize,
    history: Vec<String>,
    /// Index into `history` while browsing, `None` when editing a fresh line
    history_pos: Option<usize>,
    /// The fresh line saved when browsing starts
    draft: Vec<char>,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    /// Cursor position in characters
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Apply an editing action. Actions that are not edits are ignored.
    pub fn apply(&mut self, action: EditAction) {
        match action {
            EditAction::Insert(c) => {
                self.buffer.insert(self.cursor, c);
                self.cursor += 1;
            }
            EditAction::Backspace => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.buffer.remove(self.cursor);
                }
            }
            EditAction::Delete => {
                if self.cursor < self.buffer.len() {
                    self.buffer.remove(self.cursor);
                }
            }
            EditAction::Left => self.cursor = self.cursor.saturating_sub(1),
            EditAction::Right => self.cursor = (self.cursor + 1).min(self.buffer.len()),
            EditAction::Home => self.cursor = 0,
            EditAction::End => self.cursor = self.buffer.len(),
            EditAction::HistoryPrev => self.history_prev(),
            EditAction::HistoryNext => self.history_next(),
            EditAction::Submit
            | EditAction::Interrupt
            | EditAction::EndOfInput
            | EditAction::ClearScreen
            | EditAction::Ignore => {}
        }
    }

    /// Take the current line, remembering it in history when non-empty.
    pub fn take_line(&mut self) -> String {
        let line: String = self.buffer.drain(..).collect();
        self.cursor = 0;
        self.history_pos = None;
        self.draft.clear();

        if !line.is_empty() && self.history.last() != Some(&line) {
            self.history.push(line.clone());
        }
        line
    }

    fn history_prev(&mut self) {
        let next = match self.history_pos {
            None if self.history.is_empty() => return,
            None => {
                self.draft = self.buffer.clone();
                self.history.len() - 1
            }
            Some(0) => return,
            Some(i) => i - 1,
        };
        self.history_pos = Some(next);
        self.load(self.history[next].chars().collect());
    }

    fn history_next(&mut self) {
        match self.history_pos {
            None => {}
            Some(i) if i + 1 < self.history.len() => {
                self.history_pos = Some(i + 1);
                self.load(self.history[i + 1].chars().collect());
            }
            Some(_) => {
                self.history_pos = None;
                let draft = std::mem::take(&mut self.draft);
                self.load(draft);
            }
        }
    }

    fn load(&mut self, line: Vec<char>) {
        self.buffer = line;
        self.cursor = self.buffer.len();
    }
}

// ============================================================================
// Terminal Prompt
// ============================================================================

/// Raw-mode prompt reading key events from the terminal
pub struct TerminalPrompt {
    console: Arc<TerminalConsole>,
    events: EventStream,
}

impl TerminalPrompt {
    /// Switch the terminal into raw mode and start listening for key events.
    /// Raw mode is left again by the session's terminal restore.
    pub fn new(console: Arc<TerminalConsole>) -> std::io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(TerminalPrompt {
            console,
            events: EventStream::new(),
        })
    }
}

#[async_trait]
impl LineInput for TerminalPrompt {
    async fn read_line(&mut self) -> std::io::Result<InputEvent> {
        self.console.show_prompt();

        loop {
            let event = match self.events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e),
                None => return Ok(InputEvent::Eof),
            };

            match event {
                Event::Key(key) => match classify_key(&key) {
                    EditAction::Submit => return Ok(InputEvent::Line(self.console.submit_line())),
                    EditAction::Interrupt => return Ok(InputEvent::Interrupt),
                    EditAction::EndOfInput => {
                        if self.console.edit(|editor| editor.is_empty()) {
                            return Ok(InputEvent::Eof);
                        }
                        self.console.edit(|editor| editor.apply(EditAction::Delete));
                    }
                    EditAction::ClearScreen => self.console.clear_screen(),
                    EditAction::Ignore => {}
                    action => self.console.edit(|editor| editor.apply(action)),
                },
                Event::Resize(_, _) => self.console.redraw(),
                _ => {}
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_text(editor: &mut LineEditor, text: &str) {
        for c in text.chars() {
            editor.apply(EditAction::Insert(c));
        }
    }

    #[test]
    fn test_classify_key() {
        assert_eq!(classify_key(&key(KeyCode::Char('x'))), EditAction::Insert('x'));
        assert_eq!(classify_key(&key(KeyCode::Enter)), EditAction::Submit);
        assert_eq!(classify_key(&key(KeyCode::Up)), EditAction::HistoryPrev);
        assert_eq!(classify_key(&ctrl('c')), EditAction::Interrupt);
        assert_eq!(classify_key(&ctrl('d')), EditAction::EndOfInput);
        assert_eq!(classify_key(&ctrl('r')), EditAction::ClearScreen);
        assert_eq!(classify_key(&ctrl('z')), EditAction::Ignore);

        let mut release = key(KeyCode::Char('x'));
        release.kind = KeyEventKind::Release;
        assert_eq!(classify_key(&release), EditAction::Ignore);
    }

    #[test]
    fn test_insert_and_cursor_movement() {
        let mut editor = LineEditor::new();
        type_text(&mut editor, "pig");
        editor.apply(EditAction::Left);
        editor.apply(EditAction::Insert('n'));
        assert_eq!(editor.text(), "ping");
        assert_eq!(editor.cursor(), 3);

        editor.apply(EditAction::Home);
        editor.apply(EditAction::Delete);
        assert_eq!(editor.text(), "ing");

        editor.apply(EditAction::End);
        editor.apply(EditAction::Backspace);
        assert_eq!(editor.text(), "in");
        assert_eq!(editor.cursor(), 2);

        // Movement is clamped to the buffer
        editor.apply(EditAction::Right);
        assert_eq!(editor.cursor(), 2);
        editor.apply(EditAction::Home);
        editor.apply(EditAction::Left);
        editor.apply(EditAction::Backspace);
        assert_eq!(editor.cursor(), 0);
        assert_eq!(editor.text(), "in");
    }

    #[test]
    fn test_multibyte_editing() {
        let mut editor = LineEditor::new();
        type_text(&mut editor, "héllo");
        editor.apply(EditAction::Home);
        editor.apply(EditAction::Right);
        editor.apply(EditAction::Delete);
        assert_eq!(editor.text(), "hllo");
    }

    #[test]
    fn test_take_line_records_history() {
        let mut editor = LineEditor::new();
        type_text(&mut editor, "first");
        assert_eq!(editor.take_line(), "first");
        assert!(editor.is_empty());
        assert_eq!(editor.cursor(), 0);

        // Empty lines and immediate repeats are not recorded
        assert_eq!(editor.take_line(), "");
        type_text(&mut editor, "first");
        editor.take_line();
        type_text(&mut editor, "second");
        editor.take_line();

        assert_eq!(editor.history(), ["first", "second"]);
    }

    #[test]
    fn test_history_navigation_keeps_draft() {
        let mut editor = LineEditor::new();
        type_text(&mut editor, "one");
        editor.take_line();
        type_text(&mut editor, "two");
        editor.take_line();

        type_text(&mut editor, "dra");
        editor.apply(EditAction::HistoryPrev);
        assert_eq!(editor.text(), "two");
        editor.apply(EditAction::HistoryPrev);
        assert_eq!(editor.text(), "one");
        // Already at the oldest entry
        editor.apply(EditAction::HistoryPrev);
        assert_eq!(editor.text(), "one");

        editor.apply(EditAction::HistoryNext);
        assert_eq!(editor.text(), "two");
        editor.apply(EditAction::HistoryNext);
        assert_eq!(editor.text(), "dra");
        assert_eq!(editor.cursor(), 3);
    }

    #[test]
    fn test_history_on_empty_editor() {
        let mut editor = LineEditor::new();
        editor.apply(EditAction::HistoryPrev);
        editor.apply(EditAction::HistoryNext);
        assert!(editor.is_empty());
    }
}
