//! Mapping of Bot API updates onto domain messages

use dropwatch_domain::{
    AnnotationKind, ChannelIdentity, EventKind, InboundMessage, MediaAttachment, MediaKind,
    TextAnnotation,
};
use teloxide::types::{
    Message, MessageEntity, MessageEntityKind, PhotoSize, Update, UpdateKind,
};

/// Convert an update into an inbound message, or `None` for update kinds we do not watch
pub(crate) fn inbound_from_update(update: &Update) -> Option<InboundMessage> {
    match &update.kind {
        UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => {
            Some(inbound_from_message(msg, EventKind::New))
        }
        UpdateKind::EditedMessage(msg) | UpdateKind::EditedChannelPost(msg) => {
            Some(inbound_from_message(msg, EventKind::Edit))
        }
        _ => None,
    }
}

pub(crate) fn inbound_from_message(msg: &Message, event: EventKind) -> InboundMessage {
    let channel = channel_identity(msg.chat.id.0, msg.chat.username());

    // Media posts carry their text and entities in the caption
    let (text, entities) = match msg.text() {
        Some(text) => (text, msg.entities()),
        None => (msg.caption().unwrap_or_default(), msg.caption_entities()),
    };

    let annotations = entities
        .unwrap_or_default()
        .iter()
        .map(annotation_from_entity)
        .collect();

    let mut inbound = InboundMessage::from_text(channel, msg.id.0.to_string(), text)
        .with_annotations(annotations)
        .with_event(event);

    if let Some(media) = media_from_message(msg) {
        inbound = inbound.with_media(media);
    }
    inbound
}

pub(crate) fn channel_identity(chat_id: i64, username: Option<&str>) -> ChannelIdentity {
    ChannelIdentity::new(Some(&chat_id.to_string()), username)
}

pub(crate) fn annotation_from_entity(entity: &MessageEntity) -> TextAnnotation {
    match &entity.kind {
        MessageEntityKind::Spoiler => {
            TextAnnotation::new(AnnotationKind::Spoiler, entity.offset, entity.length)
        }
        MessageEntityKind::TextLink { url } => {
            TextAnnotation::text_link(entity.offset, entity.length, url.as_str())
        }
        MessageEntityKind::Url => {
            TextAnnotation::new(AnnotationKind::Url, entity.offset, entity.length)
        }
        _ => TextAnnotation::new(AnnotationKind::Other, entity.offset, entity.length),
    }
}

fn media_from_message(msg: &Message) -> Option<MediaAttachment> {
    if let Some(photo) = msg.photo().and_then(largest_photo) {
        return Some(MediaAttachment {
            kind: MediaKind::Photo,
            source: photo.file.id.to_string(),
        });
    }

    msg.video().map(|video| MediaAttachment {
        kind: MediaKind::Video,
        source: video.file.id.to_string(),
    })
}

/// Telegram sends several sizes of one photo; OCR wants the biggest
pub(crate) fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes
        .iter()
        .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::{FileId, FileMeta, FileUniqueId};

    fn photo(id: &str, width: u32, height: u32) -> PhotoSize {
        PhotoSize {
            file: FileMeta {
                id: FileId(id.to_string()),
                unique_id: FileUniqueId(format!("u-{}", id)),
                size: width * height,
            },
            width,
            height,
        }
    }

    #[test]
    fn test_channel_identity_normalizes_supergroup_id() {
        let identity = channel_identity(-1001234567890, Some("StakeDrops"));

        assert_eq!(identity.id.as_deref(), Some("1234567890"));
        assert_eq!(identity.handle.as_deref(), Some("stakedrops"));
    }

    #[test]
    fn test_private_channel_has_no_handle() {
        let identity = channel_identity(-1009, None);

        assert_eq!(identity.key(), "9");
        assert!(identity.handle.is_none());
    }

    #[test]
    fn test_spoiler_entity() {
        let entity = MessageEntity::new(MessageEntityKind::Spoiler, 6, 12);
        let annotation = annotation_from_entity(&entity);

        assert_eq!(annotation.kind, AnnotationKind::Spoiler);
        assert_eq!((annotation.offset, annotation.length), (6, 12));
        assert!(annotation.url.is_none());
    }

    #[test]
    fn test_text_link_entity_keeps_url() {
        let url = "https://playstake.club/bonus?code=WEEKLY2026"
            .parse()
            .unwrap();
        let entity = MessageEntity::new(MessageEntityKind::TextLink { url }, 0, 5);
        let annotation = annotation_from_entity(&entity);

        assert_eq!(annotation.kind, AnnotationKind::TextLink);
        assert_eq!(
            annotation.url.as_deref(),
            Some("https://playstake.club/bonus?code=WEEKLY2026")
        );
    }

    #[test]
    fn test_unrelated_entities_map_to_other() {
        let entity = MessageEntity::new(MessageEntityKind::Bold, 0, 4);

        assert_eq!(annotation_from_entity(&entity).kind, AnnotationKind::Other);
    }

    #[test]
    fn test_largest_photo_wins() {
        let sizes = vec![photo("small", 90, 90), photo("big", 1280, 720), photo("mid", 320, 180)];

        assert_eq!(largest_photo(&sizes).unwrap().file.id.0, "big");
        assert!(largest_photo(&[]).is_none());
    }
}
