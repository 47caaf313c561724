use core::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  OutOfMemory,
  Translation,
  InvalidArgument,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Display for Error {
  fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
    match self {
      Error::OutOfMemory => write!(f, "out of memory"),
      Error::Translation => write!(f, "translation failed"),
      Error::InvalidArgument => write!(f, "invalid argument"),
    }
  }
}
