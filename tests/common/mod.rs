#![allow(dead_code)]

use shortener_core::prelude::*;
use uuid::Uuid;

pub fn memory() -> MemorySession {
    MemorySession::shortener()
}

pub async fn create_url<S: Session>(session: &S, full_url: &str) -> Url {
    Repository::<Url>::new()
        .create(session, NewUrl::active(full_url))
        .await
        .unwrap()
}

pub async fn create_banned_url<S: Session>(session: &S, full_url: &str) -> Url {
    Repository::<Url>::new()
        .create(
            session,
            NewUrl {
                full_url: full_url.to_string(),
                is_active: false,
            },
        )
        .await
        .unwrap()
}

pub async fn create_click<S: Session>(session: &S, url_id: Uuid, client: &str) -> Click {
    Repository::<Click>::new()
        .create(
            session,
            NewClick {
                url_id,
                client: client.to_string(),
            },
        )
        .await
        .unwrap()
}

pub fn new_click(url_id: Uuid, client: &str) -> NewClick {
    NewClick {
        url_id,
        client: client.to_string(),
    }
}
