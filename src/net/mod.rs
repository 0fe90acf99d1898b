mod socket;
mod tls;

pub(crate) use socket::Socket;
pub(crate) use tls::maybe_upgrade;
