use {
    commbridge_protocol::{ActionResponse, Value, actions, keys},
    serde_json::json,
    tracing::debug,
};

use super::ActionRegistry;

pub(super) fn register(reg: &mut ActionRegistry) {
    // nudge: echo the whole request message back as `msg`
    reg.register(
        actions::NUDGE,
        Box::new(|ctx| {
            Box::pin(async move {
                debug!(comm_id = %ctx.channel_id(), keys = ctx.envelope.payload.len(), "nudge");
                let msg = json!({
                    "action": ctx.envelope.action,
                    "data": Value::Object(ctx.envelope.payload),
                });
                Ok(ActionResponse::ok(actions::NUDGE).with(keys::MSG, msg))
            })
        }),
    );
}
