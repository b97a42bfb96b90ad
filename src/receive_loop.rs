//! Reply classification and the receive loop shared by both engines.
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, trace};

use crate::cancel::Cancellation;
use crate::error::Error;
use crate::models::{EchoReply, IcmpMessage, QuotedProbe, Reply};
use crate::receiver::Receiver;

/// Pause after a read timeout or a read error before reading again.
pub const RETRY_PAUSE: Duration = Duration::from_millis(30);

/// Callbacks invoked for each classified reply.
///
/// Returning an error stops the receive loop and ends the run.
pub trait ReplyHandler {
    fn on_echo_reply(&mut self, reply: &Reply, echo: &EchoReply) -> Result<()>;

    fn on_destination_unreachable(
        &mut self,
        reply: &Reply,
        code: u8,
        quote: &QuotedProbe,
    ) -> Result<()>;

    fn on_time_exceeded(&mut self, reply: &Reply, code: u8, quote: &QuotedProbe) -> Result<()>;

    fn on_unknown(&mut self, reply: &Reply, icmp_type: u8, code: u8) -> Result<()> {
        debug!(
            "unknown packet type from={} type={} code={}",
            reply.reply_src_addr, icmp_type, code
        );
        Ok(())
    }
}

/// Route a reply to the handler callback matching its ICMP message.
pub fn dispatch<H: ReplyHandler + ?Sized>(handler: &mut H, reply: &Reply) -> Result<()> {
    match &reply.message {
        IcmpMessage::EchoReply(echo) => handler.on_echo_reply(reply, echo),
        IcmpMessage::DestinationUnreachable { code, quote } => {
            handler.on_destination_unreachable(reply, *code, quote)
        }
        IcmpMessage::TimeExceeded { code, quote } => handler.on_time_exceeded(reply, *code, quote),
        IcmpMessage::Unknown { icmp_type, code } => handler.on_unknown(reply, *icmp_type, *code),
    }
}

/// Read and dispatch replies until `cancel` is triggered.
///
/// Read timeouts, read errors and malformed packets never end the loop.
pub fn receive_loop<H: ReplyHandler + ?Sized>(
    receiver: &mut Receiver,
    handler: &mut H,
    cancel: &Cancellation,
    deadline: Duration,
) -> Result<()> {
    while !cancel.is_cancelled() {
        match receiver.next_reply(deadline) {
            Ok(reply) => {
                trace!("{:?}", reply);
                dispatch(handler, &reply)?;
            }
            Err(error) => match error.downcast_ref::<Error>() {
                Some(Error::Timeout) => {
                    trace!("read deadline exceeded");
                    cancel.sleep(RETRY_PAUSE);
                }
                Some(Error::Parse(message)) => debug!("drop packet: {}", message),
                _ => {
                    error!("read failed: {:?}", error);
                    cancel.sleep(RETRY_PAUSE);
                }
            },
        }
    }
    debug!("{}", receiver.statistics());
    Ok(())
}
