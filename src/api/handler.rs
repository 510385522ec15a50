use crate::api::schemas::*;
use crate::error::AppError;
use crate::supervisor::Supervisor;
use crate::utils::audit_logger::AuditLogger;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Maps wire command names onto supervisor operations.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    supervisor: Arc<Supervisor>,
    audit_logger: Option<Arc<AuditLogger>>,
}

impl CommandHandler {
    pub fn new(supervisor: Arc<Supervisor>, audit_logger: Option<Arc<AuditLogger>>) -> Self {
        Self {
            supervisor,
            audit_logger,
        }
    }

    #[instrument(skip(self, request), fields(command = %request.command, request_id = %request.id))]
    pub async fn handle(&self, request: Request) -> Response {
        let id = request.id.clone();
        match self.dispatch(request).await {
            Ok(result) => Response::success(id, result),
            Err(err) => {
                debug!(kind = err.kind(), error = %err, "Command failed");
                Response::failure(id, ErrorBody::from(&err))
            }
        }
    }

    async fn audit(&self, command: &str, args: &Value) {
        if let Some(logger) = &self.audit_logger {
            logger.log_command_call(command, args).await;
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Value, AppError> {
        let args = Value::Object(request.args);

        // Mutations are parsed first, so the audit trail only records well-formed calls.
        macro_rules! handle_mutation {
            ($name:literal, $params:ty, |$bound:pat_param| $call:expr) => {{
                let $bound: $params = parse_args(&args)?;
                self.audit($name, &args).await;
                let result = $call.await?;
                Ok(serde_json::to_value(&result)?)
            }};
        }

        match request.command.as_str() {
            "get_terminals" => Ok(serde_json::to_value(self.supervisor.get_terminals())?),
            "get_logs" => {
                let IdParams { id } = parse_args(&args)?;
                Ok(serde_json::to_value(self.supervisor.get_logs(&id)?)?)
            }
            "get_process_status" => {
                let IdParams { id } = parse_args(&args)?;
                let status = self.supervisor.get_process_status(&id)?;
                Ok(Value::String(status.as_str().to_string()))
            }
            "add_terminal" => handle_mutation!(
                "add_terminal",
                AddTerminalParams,
                |AddTerminalParams { data }| self.supervisor.add_terminal(data)
            ),
            "update_terminal" => handle_mutation!(
                "update_terminal",
                UpdateTerminalParams,
                |UpdateTerminalParams { id, data }| self.supervisor.update_terminal(&id, data)
            ),
            "delete_terminal" => handle_mutation!(
                "delete_terminal",
                IdParams,
                |IdParams { id }| self.supervisor.delete_terminal(&id)
            ),
            "start_process" => handle_mutation!(
                "start_process",
                IdParams,
                |IdParams { id }| self.supervisor.start_process(&id)
            ),
            "stop_process" => handle_mutation!(
                "stop_process",
                IdParams,
                |IdParams { id }| self.supervisor.stop_process(&id)
            ),
            other => {
                error!("Unknown command called: {}", other);
                Err(AppError::UnknownCommand(format!(
                    "'{}'. Available: {}",
                    other,
                    COMMANDS.join(", ")
                )))
            }
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, AppError> {
    serde_json::from_value(args.clone())
        .map_err(|e| AppError::InvalidInputArgument(format!("Invalid arguments: {}", e)))
}

/// Builds the response for a line that is not a valid request.
pub fn malformed_request(line: &str, err: &serde_json::Error) -> Response {
    info!(error = %err, "Rejecting malformed request line");
    let preview: String = line.chars().take(120).collect();
    Response::failure(
        Value::Null,
        ErrorBody::new(
            "InvalidRequest",
            format!("Malformed request ({}): {}", err, preview),
        ),
    )
}
