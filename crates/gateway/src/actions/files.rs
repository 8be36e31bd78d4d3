//! Actions that operate on notebook and live-script paths.

use std::path::{Path, PathBuf};

use {
    commbridge_common::{PollOptions, PollOutcome, poll_with_timeout},
    commbridge_protocol::{ActionResponse, Value, actions, keys},
    tracing::{debug, error, info, warn},
};

use {
    super::{ActionContext, ActionRegistry, ActionResult},
    crate::{error::BridgeError, paths},
};

pub(super) fn register(reg: &mut ActionRegistry) {
    reg.register(
        actions::CHECK_FILE_EXISTS,
        Box::new(|ctx| Box::pin(check_file_exists(ctx))),
    );
    reg.register(actions::CONVERT, Box::new(|ctx| Box::pin(convert(ctx))));
    reg.register(actions::EDIT, Box::new(|ctx| Box::pin(edit(ctx))));
}

async fn check_file_exists(ctx: ActionContext) -> ActionResult {
    let response = ActionResponse::ok(actions::CHECK_FILE_EXISTS);
    let Some(raw) = ctx.envelope.str_field(keys::MLX_FILE_PATH) else {
        return Ok(response
            .with(keys::EXISTS, false)
            .with_error(rejected(&ctx, "no file path provided for checking if it exists")));
    };

    let checked = match paths::resolve(raw).await {
        Ok(path) => paths::exists(&path).await.map(|found| (path, found)),
        Err(e) => Err(e),
    };
    match checked {
        Ok((path, found)) => {
            debug!(comm_id = %ctx.channel_id(), path = %path.display(), found, "checked file");
            Ok(response.with(keys::EXISTS, found))
        },
        Err(e) => Ok(response.with(keys::EXISTS, false).with_error(e.to_string())),
    }
}

async fn convert(ctx: ActionContext) -> ActionResult {
    let response = ActionResponse::ok(actions::CONVERT).with(keys::MLX_FILE_PATH, Value::Null);
    let (Some(source), Some(target)) = (
        ctx.envelope.str_field(keys::IPYNB_FILE_PATH),
        ctx.envelope.str_field(keys::MLX_FILE_PATH),
    ) else {
        return Ok(response.with_error(rejected(
            &ctx,
            "convert requires ipynbFilePath and mlxFilePath",
        )));
    };
    let (source, target) = match (engine_path(source), engine_path(target)) {
        (Ok(source), Ok(target)) => (source, target),
        (Err(e), _) | (_, Err(e)) => return Ok(response.with_error(rejected(&ctx, &e))),
    };
    debug!(
        comm_id = %ctx.channel_id(),
        source = %source.display(),
        target = %target.display(),
        "converting"
    );

    let expression = ctx
        .state
        .actions
        .render_convert(&source.to_string_lossy(), &target.to_string_lossy());

    match ctx.state.eval.send_eval(&expression).await {
        Ok(result) if result.is_error => {
            error!(comm_id = %ctx.channel_id(), error = %result.response_text, "conversion failed");
            Ok(response.with_error(result.response_text))
        },
        Ok(_) => {
            info!(comm_id = %ctx.channel_id(), target = %target.display(), "conversion done");
            Ok(response.with(keys::MLX_FILE_PATH, target.to_string_lossy().into_owned()))
        },
        Err(e) => {
            error!(comm_id = %ctx.channel_id(), error = %e, "convert could not reach the engine");
            Ok(response.with_error(e.to_string()))
        },
    }
}

async fn edit(ctx: ActionContext) -> ActionResult {
    let Some(raw) = ctx.envelope.str_field(keys::MLX_FILE_PATH) else {
        return Ok(ActionResponse::err(
            actions::EDIT,
            rejected(&ctx, "no file path provided for editing"),
        ));
    };
    let path = match engine_path(raw) {
        Ok(path) => path,
        Err(e) => return Ok(ActionResponse::err(actions::EDIT, rejected(&ctx, &e))),
    };
    info!(comm_id = %ctx.channel_id(), path = %path.display(), "opening file for edit");

    match open_for_edit(&ctx, &path).await {
        Ok(()) => {
            info!(comm_id = %ctx.channel_id(), "edit request sent");
            Ok(ActionResponse::ok(actions::EDIT))
        },
        Err(e) => {
            error!(comm_id = %ctx.channel_id(), kind = e.kind(), error = %e, "edit failed");
            Ok(ActionResponse::err(actions::EDIT, e.to_string()))
        },
    }
}

/// Wait for the engine front-end to report the client marker, let it settle,
/// then ask it to open `path`.
async fn open_for_edit(ctx: &ActionContext, path: &Path) -> Result<(), BridgeError> {
    let settings = &ctx.state.actions;
    let eval = &ctx.state.eval;
    let probe = settings.client_probe_expression.as_str();
    let marker = settings.client_marker.as_str();
    let options = PollOptions::new(settings.poll_interval(), settings.poll_max_attempts);

    poll_with_timeout(options, ctx.cancel(), move |attempt| async move {
        match eval.send_eval(probe).await {
            Ok(result) if result.is_error => {
                warn!(attempt, error = %result.response_text, "client probe reported an error");
                PollOutcome::Retryable(result.response_text)
            },
            Ok(result) if result.response_text.contains(marker) => PollOutcome::Success(()),
            Ok(result) => PollOutcome::Retryable(format!(
                "client type is {:?}",
                result.response_text.trim()
            )),
            Err(e) => PollOutcome::Failed(BridgeError::Transport(e)),
        }
    })
    .await
    .map_err(BridgeError::from)?;

    tokio::select! {
        biased;
        () = ctx.cancel().cancelled() => return Err(BridgeError::Cancelled),
        () = tokio::time::sleep(settings.edit_settle()) => {},
    }

    let result = eval
        .send_eval(&settings.render_edit(&path.to_string_lossy()))
        .await?;
    if result.is_error {
        return Err(BridgeError::RemoteEvaluation(format!(
            "failed to send edit request: {}",
            result.response_text
        )));
    }
    Ok(())
}

/// Log a payload validation failure and return its message.
fn rejected(ctx: &ActionContext, message: &str) -> String {
    let err = BridgeError::validation(message);
    error!(comm_id = %ctx.channel_id(), action = %ctx.action(), kind = err.kind(), "{err}");
    err.to_string()
}

/// A path headed for an engine expression: `~` expanded, otherwise as sent.
///
/// Control characters cannot be carried inside a MATLAB char literal.
fn engine_path(raw: &str) -> Result<PathBuf, String> {
    if raw.chars().any(char::is_control) {
        return Err(format!("path contains control characters: {raw:?}"));
    }
    Ok(paths::expand_user(raw))
}
