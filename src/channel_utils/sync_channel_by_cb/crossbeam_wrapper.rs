use crossbeam::channel::{unbounded, Receiver, RecvError, SendError, Sender, TryRecvError};
use std::io::{Error, ErrorKind, Read, Result, Write};

/// Writing half of an in-memory byte pipe.
pub struct CrossbeamSender(Sender<u8>);
/// Reading half of an in-memory byte pipe.
pub struct CrossbeamReceiver(Receiver<u8>);

impl Write for CrossbeamSender {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        for &v in buf {
            if let Err(SendError(v)) = self.0.send(v) {
                return Err(Error::new(ErrorKind::BrokenPipe, SendError(v)));
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Read for CrossbeamReceiver {
    /// Blocks until at least one byte is available, then drains what is already buffered.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        match self.0.recv() {
            Ok(v) => buf[0] = v,
            Err(RecvError) => return Err(Error::new(ErrorKind::BrokenPipe, RecvError)),
        }

        for i in 1..buf.len() {
            match self.0.try_recv() {
                Ok(v) => buf[i] = v,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(i),
            }
        }

        Ok(buf.len())
    }
}

/// A connected sender/receiver pair.
pub fn cbch_pair() -> (CrossbeamSender, CrossbeamReceiver) {
    let (s, r) = unbounded();
    (CrossbeamSender(s), CrossbeamReceiver(r))
}
