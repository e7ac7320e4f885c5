use tracing::{debug, trace};

use crate::core::{Result, PROTOCOL_VERSION};
use crate::registry::{Registry, RegistryGuard};
use super::message::{ErrorCode, Frame, Request, Response};

/// Answers one request frame.
///
/// The registry lock is held for the whole request, so multi-variable reads
/// see a single snapshot. Every frame yields exactly one response.
pub async fn dispatch(registry: &Registry, frame: &Frame) -> Frame {
    let request = match Request::from_frame(frame) {
        Ok(request) => request,
        Err(code) => {
            debug!(command = frame.command, ?code, "Rejected frame");
            return Response::Error(code).into_frame();
        }
    };
    trace!(?request, "Dispatching");

    let mut guard = registry.lock().await;
    let response = match answer(&mut guard, request) {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "Request failed");
            Response::Error(ErrorCode::from_error(&e))
        }
    };
    drop(guard);

    response.into_frame()
}

fn answer(guard: &mut RegistryGuard<'_>, request: Request) -> Result<Response> {
    let response = match request {
        Request::QueryVersion => Response::Version(PROTOCOL_VERSION),
        Request::QueryVariables => Response::Variables(guard.describe()),
        Request::ReadVariable(id) => Response::Value(guard.read(id)?),
        Request::ReadVariables(ids) => {
            let mut values = Vec::new();
            for id in ids {
                values.extend_from_slice(&guard.read(id)?);
            }
            Response::Values(values)
        }
        Request::WriteVariable { id, value } => {
            guard.write_client(id, &value)?;
            Response::Ok
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::*;

    async fn registry() -> Registry {
        let registry = Registry::new();
        registry.register(1, false).await.unwrap();
        registry.register(4, true).await.unwrap();
        registry.register(2, false).await.unwrap();
        registry.seal().await;
        registry
    }

    #[tokio::test]
    async fn test_version_and_variable_list() {
        let registry = registry().await;

        let version = dispatch(&registry, &Frame::empty(CMD_QUERY_VERSION)).await;
        assert_eq!(version, Frame::new(CMD_VERSION, vec![2, 0, 0]));

        let list = dispatch(&registry, &Frame::empty(CMD_QUERY_VARIABLES)).await;
        assert_eq!(list, Frame::new(CMD_VARIABLES, vec![0x01, 0x84, 0x02]));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let registry = registry().await;

        let ok = dispatch(&registry, &Frame::new(CMD_WRITE_VARIABLE, vec![1, 1, 2, 3, 4])).await;
        assert_eq!(ok, Frame::empty(CMD_OK));

        let value = dispatch(&registry, &Frame::new(CMD_READ_VARIABLE, vec![1])).await;
        assert_eq!(value, Frame::new(CMD_VARIABLE_VALUE, vec![1, 2, 3, 4]));

        let values = dispatch(&registry, &Frame::new(CMD_READ_VARIABLES, vec![2, 1, 0])).await;
        assert_eq!(values, Frame::new(CMD_VARIABLE_VALUES, vec![0, 0, 1, 2, 3, 4, 0]));
    }

    #[tokio::test]
    async fn test_error_responses() {
        let registry = registry().await;

        let cases = [
            (Frame::new(CMD_READ_VARIABLE, vec![9]), ErrorCode::InvalidId),
            (Frame::new(CMD_READ_VARIABLES, vec![0, 9]), ErrorCode::InvalidId),
            (Frame::new(CMD_WRITE_VARIABLE, vec![0, 5]), ErrorCode::ReadOnly),
            (Frame::new(CMD_WRITE_VARIABLE, vec![1, 5]), ErrorCode::InvalidSize),
            (Frame::new(CMD_WRITE_VARIABLE, vec![9, 5]), ErrorCode::InvalidId),
            (Frame::new(CMD_READ_VARIABLE, Vec::<u8>::new()), ErrorCode::Malformed),
            (Frame::empty(0x42), ErrorCode::Unsupported),
        ];
        for (request, code) in cases {
            assert_eq!(dispatch(&registry, &request).await, Frame::empty(code.code()));
        }

        // Rejected writes leave the slot untouched
        let value = dispatch(&registry, &Frame::new(CMD_READ_VARIABLE, vec![0])).await;
        assert_eq!(value.payload.as_ref(), &[0]);
    }
}
