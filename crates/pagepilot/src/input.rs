//! Synthetic input primitives.
//!
//! Press-then-release pairs for mouse and touch, and the three-event
//! sequence Chromium expects for one typed character. All of these are
//! fire-and-forget with respect to the page's own event handling; only the
//! protocol call itself is awaited.

use cdp_session::{BrowserSession, KeyEvent, TouchPoint};

use crate::error::PilotError;

// Arbitrary but stable virtual key code for the down/up frames around a
// `char` event; the text payload is what the page actually sees.
const CHAR_KEY_CODE: u32 = 55;

/// Left-button single click at a point in page coordinates.
pub async fn dispatch_click(
    session: &dyn BrowserSession,
    x: f64,
    y: f64,
) -> Result<(), PilotError> {
    session
        .dispatch_mouse_event("mousePressed", x, y, "left", 1)
        .await?;
    session
        .dispatch_mouse_event("mouseReleased", x, y, "left", 1)
        .await?;
    Ok(())
}

/// Touch press-then-release at a point in page coordinates.
pub async fn dispatch_tap(session: &dyn BrowserSession, x: f64, y: f64) -> Result<(), PilotError> {
    let point = TouchPoint { x, y };
    session.dispatch_touch_event("touchStart", &[point]).await?;
    session.dispatch_touch_event("touchEnd", &[]).await?;
    Ok(())
}

/// Emit one typed character against the focused element.
pub async fn send_key(session: &dyn BrowserSession, ch: char) -> Result<(), PilotError> {
    session
        .dispatch_key_event(KeyEvent::new("rawKeyDown").with_key_code(CHAR_KEY_CODE))
        .await?;

    let mut char_event = KeyEvent::new("char").with_text(ch.to_string());
    char_event.is_keypad = Some(true);
    session.dispatch_key_event(char_event).await?;

    session
        .dispatch_key_event(KeyEvent::new("keyUp").with_key_code(CHAR_KEY_CODE))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, MockSession};

    #[tokio::test]
    async fn click_is_press_then_release() {
        let session = MockSession::new();
        dispatch_click(session.as_ref(), 10.0, 20.0).await.unwrap();

        assert_eq!(
            session.calls().await,
            vec![
                Call::Mouse {
                    kind: "mousePressed".into(),
                    x: 10.0,
                    y: 20.0,
                    button: "left".into(),
                    click_count: 1,
                },
                Call::Mouse {
                    kind: "mouseReleased".into(),
                    x: 10.0,
                    y: 20.0,
                    button: "left".into(),
                    click_count: 1,
                },
            ]
        );
    }

    #[tokio::test]
    async fn tap_is_touch_start_then_end() {
        let session = MockSession::new();
        dispatch_tap(session.as_ref(), 5.0, 6.0).await.unwrap();

        assert_eq!(
            session.calls().await,
            vec![
                Call::Touch {
                    kind: "touchStart".into(),
                    points: 1,
                },
                Call::Touch {
                    kind: "touchEnd".into(),
                    points: 0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn typed_character_is_three_key_events() {
        let session = MockSession::new();
        send_key(session.as_ref(), 'a').await.unwrap();

        assert_eq!(
            session.calls().await,
            vec![
                Call::Key {
                    kind: "rawKeyDown".into(),
                    text: String::new(),
                },
                Call::Key {
                    kind: "char".into(),
                    text: "a".into(),
                },
                Call::Key {
                    kind: "keyUp".into(),
                    text: String::new(),
                },
            ]
        );
    }
}
