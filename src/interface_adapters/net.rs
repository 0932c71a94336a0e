// WebSocket adapter: upgrades connections, runs the per-connection
// read loop and keepalive ticker, and owns the socket writer task that
// serializes every outbound frame.

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::domain::GeoLocation;
use crate::frameworks::config;
use crate::interface_adapters::protocol::{OutboundFrame, ServerPacket};
use crate::interface_adapters::state::AppState;
use crate::use_cases::session::{PeerSession, SessionError};

// Replies, forwarded signaling and keepalives all queue here before the
// single socket writer; a peer this far behind stalls its read loop.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Default, Deserialize)]
pub struct GeoQuery {
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub lon: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Pulls the client location from the geo headers, falling back to query
/// parameters. Out-of-range and non-finite coordinates are discarded.
pub fn extract_geo(headers: &HeaderMap, query: &GeoQuery) -> Option<GeoLocation> {
    let lat: f64 = header_str(headers, "X-Geo-Lat")
        .or(query.lat.as_deref())?
        .parse()
        .ok()?;
    let lon: f64 = header_str(headers, "X-Geo-Lon")
        .or(query.lon.as_deref())?
        .parse()
        .ok()?;
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }
    Some(GeoLocation {
        lat,
        lon,
        country: header_str(headers, "CF-IPCountry")
            .or(query.country.as_deref())
            .map(str::to_string),
        region: header_str(headers, "X-Geo-Region")
            .or(query.region.as_deref())
            .map(str::to_string),
    })
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<GeoQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let geo = extract_geo(&headers, &query);
    ws.on_upgrade(move |socket| {
        let span = info_span!("conn", peer = tracing::field::Empty);
        handle_socket(socket, state, geo).instrument(span)
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, geo: Option<GeoLocation>) {
    let (sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_QUEUE_CAPACITY);

    // All writes to the socket happen on this one task; replies,
    // forwarded messages and pings share the ordering of the queue.
    let writer = tokio::spawn(write_loop(sender, outbound_rx).instrument(Span::current()));

    let mut session = PeerSession::new(
        Arc::clone(&state.store),
        state.metrics.clone(),
        Arc::clone(&state.credentials),
        outbound_tx.clone(),
        geo,
    );

    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + config::KEEPALIVE_INTERVAL,
        config::KEEPALIVE_INTERVAL,
    );
    let deadline = tokio::time::sleep(config::MAX_CONNECTION_TIME);
    tokio::pin!(deadline);

    let mut last_activity_write = Instant::now();
    let mut peer_recorded = false;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("connection exceeded maximum lifetime");
                break;
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match session.handle_packet(text.as_str()).await {
                            Ok(()) => {
                                if !peer_recorded && session.has_id() {
                                    Span::current().record("peer", session.id.as_str());
                                    peer_recorded = true;
                                }
                            }
                            Err(SessionError::ConnectionClosed) => break,
                            Err(err) => {
                                enqueue_error(&outbound_tx, &err);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let err = SessionError::Protocol("binary frames are not supported".into());
                        enqueue_error(&outbound_tx, &err);
                        break;
                    }
                    // The WebSocket layer answers pings by itself.
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("socket closed by client");
                        break;
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, "socket read failed");
                        break;
                    }
                }
            }

            _ = keepalive.tick() => {
                if outbound_tx
                    .send(OutboundFrame::Packet(ServerPacket::Ping))
                    .await
                    .is_err()
                {
                    // Writer is gone, so the socket is too.
                    break;
                }
                if session.has_id()
                    && last_activity_write.elapsed() >= config::ACTIVITY_WRITE_INTERVAL
                {
                    last_activity_write = Instant::now();
                    if let Err(err) = state.store.mark_peer_as_active(&session.id).await {
                        warn!(error = %err, "failed to mark peer as active");
                    }
                }
            }
        }
    }

    debug!(peer = %session.id, "peer socket closed");
    // Dropping the session's queue handles lets the writer drain what is
    // left and close the socket.
    session.teardown();
    drop(outbound_tx);
    let _ = writer.await;
}

/// Queues the error frame written right before the connection closes.
fn enqueue_error(outbound_tx: &mpsc::Sender<OutboundFrame>, err: &SessionError) {
    let packet = match err {
        SessionError::Protocol(reason) => {
            warn!(reason = %reason, "protocol violation");
            ServerPacket::protocol_error(reason.clone())
        }
        other => {
            error!(error = %other, "closing connection after internal error");
            ServerPacket::Error {
                rid: None,
                code: "internal-error".to_string(),
                message: None,
            }
        }
    };
    // Best effort: a full queue means the peer was not reading anyway.
    let _ = outbound_tx.try_send(OutboundFrame::Packet(packet));
}

/// Drains the outbound queue onto the socket, then closes it. Exits on
/// the first failed or timed-out write.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let text: Utf8Bytes = match frame {
            OutboundFrame::Packet(packet) => match serde_json::to_string(&packet) {
                Ok(text) => text.into(),
                Err(err) => {
                    error!(error = %err, "failed to serialize outbound packet");
                    continue;
                }
            },
            OutboundFrame::Raw(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text.into(),
                Err(_) => {
                    warn!("dropping non-utf8 forwarded frame");
                    continue;
                }
            },
        };

        match tokio::time::timeout(config::SOCKET_WRITE_TIMEOUT, sender.send(Message::Text(text)))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "socket write failed");
                return;
            }
            Err(_) => {
                warn!("socket write timed out");
                return;
            }
        }
    }

    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "closing".into(),
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn geo_from_headers() {
        let headers = headers(&[
            ("X-Geo-Lat", "52.37"),
            ("X-Geo-Lon", "4.89"),
            ("X-Geo-Region", "eu-west"),
            ("CF-IPCountry", "NL"),
        ]);
        let geo = extract_geo(&headers, &GeoQuery::default()).unwrap();
        assert_eq!(geo.lat, 52.37);
        assert_eq!(geo.lon, 4.89);
        assert_eq!(geo.region.as_deref(), Some("eu-west"));
        assert_eq!(geo.country.as_deref(), Some("NL"));
    }

    #[test]
    fn geo_query_fallback() {
        let query = GeoQuery {
            lat: Some("40.71".to_string()),
            lon: Some("-74.01".to_string()),
            country: Some("US".to_string()),
            region: Some("us-east".to_string()),
        };
        let geo = extract_geo(&HeaderMap::new(), &query).unwrap();
        assert_eq!(geo.lat, 40.71);
        assert_eq!(geo.country.as_deref(), Some("US"));
    }

    #[test]
    fn invalid_coordinates_are_discarded() {
        for (lat, lon) in [
            ("91", "0"),
            ("-91", "0"),
            ("0", "181"),
            ("0", "-181"),
            ("NaN", "0"),
            ("inf", "0"),
            ("not-a-number", "0"),
        ] {
            let query = GeoQuery {
                lat: Some(lat.to_string()),
                lon: Some(lon.to_string()),
                country: None,
                region: None,
            };
            assert!(
                extract_geo(&HeaderMap::new(), &query).is_none(),
                "accepted lat={lat} lon={lon}"
            );
        }

        // Latitude alone is not enough.
        let query = GeoQuery {
            lat: Some("10".to_string()),
            ..GeoQuery::default()
        };
        assert!(extract_geo(&HeaderMap::new(), &query).is_none());
    }
}
