mod common;

use common::{animated_gif, jpeg, pdf, plugin_image, png, zip, PluginDecoder};
use folio_cache::order::by_index;
use folio_core::{
    AnimationClass, ArchiveClass, ArchiveSource, Book, ContentState, DecoderRegistry,
    LoadContext, PagePayload, PdfArchive, Size, ThumbnailPlaceholder, ViewerConfig, ZipArchive,
};
use folio_scheduler::CancellationToken;
use std::sync::Arc;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

async fn open_zip(files: &[(&str, &[u8])], ctx: LoadContext) -> Book {
    let archive = ZipArchive::from_bytes("book.zip", zip(files)).expect("archive should parse");
    let source: Arc<dyn ArchiveSource> = Arc::new(archive);
    Book::open(source, Arc::new(ctx), &CancellationToken::new())
        .await
        .expect("book should open")
}

fn plugin_context(plugin: &Arc<PluginDecoder>, config: ViewerConfig) -> LoadContext {
    LoadContext::new(config)
        .with_decoders(DecoderRegistry::new().with_plugin(Arc::clone(plugin) as _))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn folder_with_image_animation_and_nested_archive() {
    let dir = tempfile::tempdir().expect("temp dir should be created");
    std::fs::write(dir.path().join("1_cover.jpg"), jpeg(400, 300)).expect("jpeg should be written");
    std::fs::write(dir.path().join("2_anim.gif"), animated_gif(32, 24, 10))
        .expect("gif should be written");
    std::fs::write(dir.path().join("3_nested.zip"), zip(&[("page.png", &png(64, 48))]))
        .expect("zip should be written");

    let ctx = Arc::new(LoadContext::default());
    let token = CancellationToken::new();
    let book = Book::open_path(dir.path(), Arc::clone(&ctx), &token)
        .await
        .expect("folder should open");
    assert_eq!(book.len(), 3);

    let summary = book.load_all(&token).await;
    assert_eq!(summary.loaded, 3);

    let cover = book.page(0).expect("cover page");
    assert_eq!(cover.content_state(), ContentState::Loaded);
    assert_eq!(cover.size(), Size::new(400, 300));

    let animation = book.page(1).expect("animation page");
    assert_eq!(animation.content_state(), ContentState::Loaded);
    assert_eq!(animation.content().animation_class(), Some(AnimationClass::Animated));
    match animation.payload() {
        Some(PagePayload::Animation(frames)) => assert_eq!(frames.len(), 10),
        other => panic!("expected animation frames, got {other:?}"),
    }

    let nested = book.page(2).expect("archive page");
    assert_eq!(nested.content_state(), ContentState::Loaded);
    assert_eq!(nested.content().data_size(), 0);
    match nested.payload() {
        Some(PagePayload::Archive {
            representative: Some(entry),
            class,
        }) => {
            assert_eq!(entry.path(), "page.png");
            assert_eq!(class, ArchiveClass::Unique);
        }
        other => panic!("expected archive with representative, got {other:?}"),
    }

    let thumbnail = nested
        .load_thumbnail(&token)
        .await
        .expect("thumbnail should not be cancelled");
    assert!(thumbnail.image().is_some());

    // Filesystem entries are never stream-cached, so only pixels are charged
    let pixels = 400 * 300 * 3 + 10 * 32 * 24 * 4;
    assert_eq!(ctx.pool().total_size(), pixels);

    book.close().await;
    assert_eq!(ctx.pool().total_size(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn memory_limit_evicts_lowest_indices() {
    let plugin = Arc::new(PluginDecoder::default());
    let ctx = plugin_context(&plugin, ViewerConfig::default().with_cache_archive_streams(false));
    let images: Vec<Vec<u8>> = (0..5).map(plugin_image).collect();
    let names = ["p0.tga", "p1.tga", "p2.tga", "p3.tga", "p4.tga"];
    let files: Vec<(&str, &[u8])> = names
        .iter()
        .zip(&images)
        .map(|(name, bytes)| (*name, bytes.as_slice()))
        .collect();
    let book = open_zip(&files, ctx).await;

    let summary = book.load_all(&CancellationToken::new()).await;
    assert_eq!(summary.loaded, 5);

    let pool = book.context().pool();
    assert_eq!(pool.total_size(), 15 * MIB);

    let report = pool.cleanup_to(10 * MIB, by_index);
    assert_eq!(report.evicted_owners, 2);
    assert_eq!(pool.total_size(), 9 * MIB);

    let states: Vec<_> = book.pages().iter().map(|page| page.content_state()).collect();
    assert_eq!(
        states,
        vec![
            ContentState::Unloaded,
            ContentState::Unloaded,
            ContentState::Loaded,
            ContentState::Loaded,
            ContentState::Loaded,
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_stops_before_visible_page() {
    let plugin = Arc::new(PluginDecoder::default());
    let ctx = plugin_context(&plugin, ViewerConfig::default().with_cache_archive_streams(false));
    let (a, b) = (plugin_image(1), plugin_image(2));
    let book = open_zip(&[("a.tga", &a), ("b.tga", &b)], ctx).await;
    book.load_all(&CancellationToken::new()).await;

    book.set_visible_range(1..2);
    let pool = book.context().pool();
    let report = pool.cleanup_to(4 * MIB, by_index);

    assert_eq!(report.evicted_owners, 1);
    assert_eq!(pool.total_size(), 3 * MIB);
    assert_eq!(book.page(1).expect("visible page").content_state(), ContentState::Loaded);

    // Nothing left that may go
    let report = pool.cleanup_to(0, by_index);
    assert_eq!(report.evicted_owners, 0);
    assert!(report.halted_at_locked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_decode_once() {
    let plugin = Arc::new(PluginDecoder::with_delay(Duration::from_millis(100)));
    let ctx = plugin_context(&plugin, ViewerConfig::default());
    let image = plugin_image(7);
    let book = open_zip(&[("page.tga", &image)], ctx).await;
    let page = book.page(0).expect("page");

    let token = CancellationToken::new();
    let (first, second) = tokio::join!(page.load_content(&token), page.load_content(&token));

    assert_eq!(first, ContentState::Loaded);
    assert_eq!(second, ContentState::Loaded);
    assert_eq!(plugin.decodes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_load_leaves_no_residue() {
    let plugin = Arc::new(PluginDecoder::with_delay(Duration::from_millis(300)));
    let ctx = plugin_context(&plugin, ViewerConfig::default());
    let image = plugin_image(3);
    let book = open_zip(&[("page.tga", &image)], ctx).await;
    let page = book.page(0).expect("page");
    let mut events = page.subscribe();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        canceller.cancel();
    });

    assert_eq!(page.load_content(&token).await, ContentState::Unloaded);
    assert_eq!(book.context().pool().total_size(), 0);
    assert!(events.try_recv().is_err());

    let state = page.load_content(&CancellationToken::new()).await;
    assert_eq!(state, ContentState::Loaded);
    assert_eq!(book.context().pool().total_size(), page.content().data_size());
}

#[tokio::test]
async fn animation_classification_survives_reload() {
    let gif = animated_gif(8, 8, 4);
    let book = open_zip(&[("anim.gif", &gif)], LoadContext::default()).await;
    let page = book.page(0).expect("page");
    let token = CancellationToken::new();

    assert_eq!(page.load_content(&token).await, ContentState::Loaded);
    assert!(page.unload());
    assert_eq!(page.load_content(&token).await, ContentState::Loaded);

    assert_eq!(page.content().animation_class(), Some(AnimationClass::Animated));
    assert_eq!(page.content().sniff_count(), 1);
}

#[tokio::test]
async fn plugin_decoder_is_remembered_across_reloads() {
    let plugin = Arc::new(PluginDecoder::default());
    let ctx = plugin_context(&plugin, ViewerConfig::default());
    let image = plugin_image(9);
    let book = open_zip(&[("page.tga", &image)], ctx).await;
    let page = book.page(0).expect("page");
    let token = CancellationToken::new();

    assert_eq!(page.load_content(&token).await, ContentState::Loaded);
    let info = page
        .content()
        .source()
        .picture_info
        .clone()
        .expect("picture info");
    assert_eq!(info.decoder, "test-plugin");
    assert_eq!(info.size, Size::new(1024, 768));
    let probes = plugin.probes();

    book.context().pool().cleanup();
    assert_eq!(page.content_state(), ContentState::Unloaded);
    assert_eq!(page.load_content(&token).await, ContentState::Loaded);

    assert_eq!(plugin.probes(), probes);
    assert_eq!(plugin.decodes(), 2);
}

#[tokio::test]
async fn unsupported_entry_fails_with_message() {
    let book = open_zip(&[("page.tga", b"not an image at all")], LoadContext::default()).await;
    let page = book.page(0).expect("page");

    assert_eq!(page.load_content(&CancellationToken::new()).await, ContentState::Failed);
    let message = page.content().error_message().expect("error message");
    assert!(message.contains("not supported"));
    assert_eq!(book.context().pool().total_size(), 0);
}

#[tokio::test]
async fn pdf_pages_render_at_clamped_size() {
    let archive = PdfArchive::from_bytes("doc.pdf", pdf(2, 200, 100)).expect("pdf should parse");
    let source: Arc<dyn ArchiveSource> = Arc::new(archive);
    let ctx = Arc::new(LoadContext::new(
        ViewerConfig::default().with_max_display_size(100, 100),
    ));
    let book = Book::open(source, ctx, &CancellationToken::new())
        .await
        .expect("pdf book should open");
    assert_eq!(book.len(), 2);

    let page = book.page(1).expect("second page");
    assert_eq!(page.load_content(&CancellationToken::new()).await, ContentState::Loaded);
    assert_eq!(page.size(), Size::new(100, 50));
    match page.payload() {
        Some(PagePayload::PdfRaster(image)) => assert_eq!(image.width(), 100),
        other => panic!("expected PDF raster, got {other:?}"),
    }

    let thumbnail = page
        .load_thumbnail(&CancellationToken::new())
        .await
        .expect("thumbnail");
    assert!(thumbnail.image().is_some());
}

#[tokio::test]
async fn thumbnails_degrade_to_placeholders() {
    let notes = b"plain text".to_vec();
    let clip = b"not really a video".to_vec();
    let media_only = zip(&[("clip.mp4", clip.as_slice())]);
    let broken = b"\x89PNG\r\n\x1a\ntruncated".to_vec();
    let book = open_zip(
        &[
            ("a_notes.txt", &notes),
            ("b_clip.mp4", &clip),
            ("c_media.zip", &media_only),
            ("d_broken.png", &broken),
        ],
        LoadContext::new(ViewerConfig::default().with_thumbnail_size(64)),
    )
    .await;

    let token = CancellationToken::new();
    let mut placeholders = Vec::new();
    for page in book.pages() {
        let thumbnail = page.load_thumbnail(&token).await.expect("thumbnail");
        placeholders.push(thumbnail.placeholder());
    }

    assert_eq!(
        placeholders,
        vec![
            Some(ThumbnailPlaceholder::Empty),
            Some(ThumbnailPlaceholder::Media),
            Some(ThumbnailPlaceholder::Media),
            Some(ThumbnailPlaceholder::Empty),
        ]
    );
}
