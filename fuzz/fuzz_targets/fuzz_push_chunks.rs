#![no_main]
use libfuzzer_sys::fuzz_target;
use xmlpush::parser::{parse_reader, ParseOptions, PushParseSession};
use xmlpush::sax::EventRecorder;

fuzz_target!(|data: &[u8]| {
    // The first byte picks the chunk size; the rest is the document.
    let Some((&split, doc)) = data.split_first() else {
        return;
    };
    let chunk_size = usize::from(split).max(1);

    for recover in [false, true] {
        let options = ParseOptions::default().recover(recover);

        let mut direct = EventRecorder::new();
        let direct_ok = parse_reader(doc, &mut direct, &options).is_ok();

        // Pushing must never panic or hang, whatever the chunking.
        let mut session = PushParseSession::with_options(EventRecorder::new(), options);
        let mut chunks = doc.chunks(chunk_size).peekable();
        let mut aborted = false;
        while let Some(chunk) = chunks.next() {
            if session.write(Some(chunk), chunks.peek().is_none()).is_err() {
                aborted = true;
                break;
            }
        }

        // In recover mode chunking must not change what the sink sees.
        if recover && !aborted && !doc.is_empty() && direct_ok {
            if let Some(pushed) = session.into_sink() {
                assert_eq!(pushed.summaries(), direct.summaries());
            }
        }
    }
});
