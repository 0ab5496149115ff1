mod room;
mod msg;
mod new;

use axum::{routing::get, Router};

use crate::AppState;

pub use new::NEW_ROOM_NAME;
pub use room::{load_room_view, RoomView};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(new::list_rooms).post(new::new_room))
        .route("/{uuid}", get(room::room).patch(room::update_room).delete(room::delete_room))
        .route("/{uuid}/messages", get(msg::list_messages).post(msg::send_message))
}
