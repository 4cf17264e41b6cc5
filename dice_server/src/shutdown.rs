use crate::world::World;
use actix::{ActorContext, Handler, Message};

/// Asks the server to stop itself.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<Shutdown> for World {
    type Result = ();

    fn handle(&mut self, _request: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        ctx.stop();
    }
}
