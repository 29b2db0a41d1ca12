//! Open endpoint sessions
//!
//! A session holds its class's gate token for as long as it lives.
//! [`ReadSession`] streams records the way a seq-file read does: one record
//! is rendered into a pending buffer and handed out across as many `read`
//! calls as the caller needs. [`ControlSession`] behaves like a small text
//! file over the on/off switch.

use crate::control::{Command, CommandError, ControlSwitch, SwitchState, Transition};
use crate::cursor::{RecordCursor, View};
use crate::gate::GateToken;
use crate::record::TraceEntry;
use std::io;

/// Gated iteration over the trace records
#[derive(Debug)]
pub struct ReadSession<'a> {
    cursor: RecordCursor<'a>,
    view: View,
    pending: Vec<u8>,
    consumed: usize,
    _token: GateToken<'a>,
}

impl<'a> ReadSession<'a> {
    pub(crate) fn new(token: GateToken<'a>, cursor: RecordCursor<'a>, view: View) -> Self {
        Self {
            cursor,
            view,
            pending: Vec::new(),
            consumed: 0,
            _token: token,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Records this session yields in total
    pub fn len(&self) -> u64 {
        self.cursor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty()
    }

    /// Logical position of the next record
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Next decoded record, bypassing the rendered byte stream
    ///
    /// Drops whatever is left of a partially read record, so later `read`
    /// calls resume at the record after this one.
    pub fn next_record(&mut self) -> Option<(u64, TraceEntry)> {
        self.pending.clear();
        self.consumed = 0;
        self.cursor.advance()
    }

    /// Restart the stream at logical record `position`
    pub fn seek_record(&mut self, position: u64) {
        self.cursor.seek(position);
        self.pending.clear();
        self.consumed = 0;
    }

    /// Close the session and release the read gate
    pub fn close(self) {}

    fn fill(&mut self) -> bool {
        while self.consumed == self.pending.len() {
            self.pending.clear();
            self.consumed = 0;
            match self.cursor.advance_raw() {
                Some((_, raw)) => self.view.render(&raw, &mut self.pending),
                None => return false,
            }
        }
        true
    }
}

impl io::Read for ReadSession<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.fill() {
            return Ok(0);
        }
        let available = &self.pending[self.consumed..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consumed += n;
        Ok(n)
    }
}

/// Gated handle on the trace switch
#[derive(Debug)]
pub struct ControlSession<'a> {
    switch: ControlSwitch<'a>,
    offset: usize,
    _token: GateToken<'a>,
}

impl<'a> ControlSession<'a> {
    pub(crate) fn new(token: GateToken<'a>, switch: ControlSwitch<'a>) -> Self {
        Self {
            switch,
            offset: 0,
            _token: token,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.switch.state()
    }

    /// Run a parsed command and report what it did
    pub fn execute(&self, command: &Command) -> Result<Transition, CommandError> {
        self.switch.execute(command)
    }

    /// Let the next `read` start from the beginning again
    pub fn rewind(&mut self) {
        self.offset = 0;
    }

    /// Close the session and release the control gate
    pub fn close(self) {}
}

impl io::Read for ControlSession<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let text = self.switch.state().as_str().as_bytes();
        let Some(rest) = text.get(self.offset..) else {
            return Ok(0);
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.offset += n;
        Ok(n)
    }
}

impl io::Write for ControlSession<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.switch.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Any open session
#[derive(Debug)]
pub enum Session<'a> {
    Read(ReadSession<'a>),
    Control(ControlSession<'a>),
}

impl io::Read for Session<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Session::Read(session) => session.read(buf),
            Session::Control(session) => session.read(buf),
        }
    }
}
