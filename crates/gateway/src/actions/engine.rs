//! Engine status and proxy startup actions.

use {
    commbridge_protocol::{ActionResponse, Map, Value, actions, keys},
    serde_json::json,
    tracing::{debug, error, info},
};

use super::ActionRegistry;

pub(super) fn register(reg: &mut ActionRegistry) {
    // matlab_status
    reg.register(
        actions::MATLAB_STATUS,
        Box::new(|ctx| {
            Box::pin(async move {
                debug!(comm_id = %ctx.channel_id(), "fetching engine status");
                let response = ActionResponse::ok(actions::MATLAB_STATUS);
                match ctx.state.engine.fetch_engine_status().await {
                    Ok(status) => Ok(response.with(
                        keys::MATLAB_STATUS,
                        json!({
                            "isLicensed": status.licensed,
                            "status": status.status,
                        }),
                    )),
                    Err(e) => {
                        error!(comm_id = %ctx.channel_id(), error = %e, "engine status failed");
                        Ok(response
                            .with(keys::MATLAB_STATUS, Value::Object(Map::new()))
                            .with_error(e.to_string()))
                    },
                }
            })
        }),
    );

    // start_matlab_proxy
    reg.register(
        actions::START_MATLAB_PROXY,
        Box::new(|ctx| {
            Box::pin(async move {
                match ctx.state.ensure_engine_started().await {
                    Ok(started) => {
                        info!(comm_id = %ctx.channel_id(), started, "engine proxy ready");
                        Ok(ActionResponse::ok(actions::START_MATLAB_PROXY))
                    },
                    Err(e) => {
                        error!(comm_id = %ctx.channel_id(), error = %e, "engine proxy startup failed");
                        Ok(ActionResponse::err(actions::START_MATLAB_PROXY, e.to_string()))
                    },
                }
            })
        }),
    );
}
