/*!
Port série scripté

`ScriptedSerial` implémente `std::io::Read` et rejoue un script : données,
timeouts, erreurs d'E/S. Une fois le script épuisé, il renvoie EOF ou, avec
`hold_open`, se comporte comme un port silencieux (timeouts à répétition).
*/

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Step {
    Data(Vec<u8>),
    Timeout,
    Fail(io::ErrorKind),
}

/// Delay of each simulated timeout, keeps `hold_open` from spinning
const TIMEOUT_DELAY: Duration = Duration::from_millis(5);

#[derive(Debug)]
pub struct ScriptedSerial {
    script: VecDeque<Step>,
    hold_open: bool,
    released: Arc<AtomicBool>,
}

impl ScriptedSerial {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            hold_open: false,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One line, `\n` appended
    pub fn line<S: AsRef<str>>(self, line: S) -> Self {
        let mut bytes = line.as_ref().as_bytes().to_vec();
        bytes.push(b'\n');
        self.raw(bytes)
    }

    pub fn lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        lines.into_iter().fold(self, |serial, line| serial.line(line))
    }

    /// Raw bytes, delivered by a single `read` when the buffer allows
    pub fn raw<B: Into<Vec<u8>>>(mut self, bytes: B) -> Self {
        self.script.push_back(Step::Data(bytes.into()));
        self
    }

    /// One read that times out, like a quiet port
    pub fn timeout(mut self) -> Self {
        self.script.push_back(Step::Timeout);
        self
    }

    /// One read that fails with `kind`
    pub fn fail(mut self, kind: io::ErrorKind) -> Self {
        self.script.push_back(Step::Fail(kind));
        self
    }

    /// Time out forever once the script is exhausted instead of reporting EOF
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Flag set when the port is dropped
    pub fn release_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl Default for ScriptedSerial {
    fn default() -> Self {
        Self::new()
    }
}

fn timed_out() -> io::Error {
    std::thread::sleep(TIMEOUT_DELAY);
    io::Error::new(io::ErrorKind::TimedOut, "scripted timeout")
}

impl Read for ScriptedSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.script.pop_front() {
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.script.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
            Some(Step::Timeout) => Err(timed_out()),
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            None if self.hold_open => Err(timed_out()),
            None => Ok(0),
        }
    }
}

impl Drop for ScriptedSerial {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
