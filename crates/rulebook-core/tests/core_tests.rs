use std::fs;

use tempfile::TempDir;

use rulebook_core::chunker::{split_sentences, Chunker};
use rulebook_core::config::{ChunkingConfig, TaggingConfig};
use rulebook_core::types::{CorpusId, MetadataFilter};

const SUT_SAMPLE: &str = "=== Sayfa 1 ===
4.2.28 - Lipid düşürücü ilaçlar

4.2.28.A - Statinler
Statinler ile tedaviye başlanabilmesi için LDL düzeyi ölçülmüş olmalıdır. Hastaya ait son 6 ay içindeki tetkik sonuçları rapora eklenir.

4.2.28.C - Ezetimib
Ezetimib aşağıdaki koşulların tamamı sağlandığında kullanılabilir:
a) En az 3 ay süreyle statin tedavisi almış olmak,
b) LDL düzeyinin hedefin üstünde kalması,
c) E78 tanı kodunun raporda belirtilmesi gerekli.
Ancak uzman hekim raporu ile reçete edilir.

=== Sayfa 2 ===
4.2.29 - Antikoagülanlar
Warfarin kullanan 18 yaş üstü hastalarda INR takibi yapılır.
";

fn chunker(max: usize, min: usize, overlap: usize) -> Chunker {
    Chunker::new(
        ChunkingConfig { max_chars: max, min_chars: min, overlap_chars: overlap },
        &TaggingConfig::default(),
    )
}

#[test]
fn reindexing_identical_text_is_idempotent() {
    let c = chunker(400, 50, 40);
    let corpus = CorpusId::new("SUT");
    let first = c.index(&corpus, SUT_SAMPLE, "sut.txt");
    let second = c.index(&corpus, SUT_SAMPLE, "sut.txt");
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn chunk_ids_and_positions() {
    let corpus = CorpusId::new("SUT");
    let chunks = chunker(400, 50, 40).index(&corpus, SUT_SAMPLE, "sut.txt");
    let total = chunks.len();
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.id, format!("sut:{i:04}"));
        assert_eq!(chunk.chunk_index, i);
        assert_eq!(chunk.total_chunks, total);
        assert_eq!(chunk.corpus_id, corpus);
        assert_eq!(chunk.source_document, "sut.txt");
        assert!(!chunk.content.contains("Sayfa"), "page markers are dropped");
    }
}

#[test]
fn chunks_never_cross_section_boundaries() {
    let chunks = chunker(2048, 512, 256).index(&CorpusId::new("SUT"), SUT_SAMPLE, "sut.txt");
    let sections: Vec<_> = chunks.iter().map(|c| c.section.clone()).collect();
    assert_eq!(
        sections,
        vec![
            Some("4.2.28".to_string()),
            Some("4.2.28.A".to_string()),
            Some("4.2.28.C".to_string()),
            Some("4.2.29".to_string()),
        ]
    );
    let ezetimib = &chunks[2];
    assert!(ezetimib.content.starts_with("4.2.28.C - Ezetimib"));
    assert!(!ezetimib.content.contains("Warfarin"));
    assert!(!ezetimib.content.contains("Statinler ile"));
}

#[test]
fn list_items_stay_in_one_chunk() {
    let text = "4.2.30 - Koşullar\n\
        Giriş paragrafı yeterince uzun bir açıklama cümlesi içerir ve tek başına durur.\n\n\
        1. Birinci koşul uzun bir açıklama ile belirtilmiştir,\n\
        2. İkinci koşul yine uzun bir açıklama ile belirtilmiştir,\n\
        3. Üçüncü koşul da aynı şekilde uzun bir açıklamadır.\n\n\
        Son paragraf listeden sonra gelen bağımsız bir açıklamadır.";
    let chunks = chunker(120, 0, 0).index(&CorpusId::new("SUT"), text, "sut.txt");
    let holders: Vec<_> = chunks.iter().filter(|c| c.content.contains("Birinci koşul")).collect();
    assert_eq!(holders.len(), 1);
    let list_chunk = holders[0];
    assert!(list_chunk.content.contains("İkinci koşul"));
    assert!(list_chunk.content.contains("Üçüncü koşul"));
    assert!(list_chunk.has_conditions);
}

#[test]
fn list_after_intro_line_stays_in_one_chunk() {
    let text = "4.2.32 - Koşullar\n\
        Aşağıdaki koşullar aranır:\n\
        1. Hasta en az 18 yaşında olmalıdır.\n\n\
        2. LDL düzeyi hedefin üstünde kalmalıdır bu koşulla.";
    let chunks = chunker(60, 0, 0).index(&CorpusId::new("SUT"), text, "sut.txt");
    let holders: Vec<_> = chunks.iter().filter(|c| c.content.contains("1. Hasta")).collect();
    assert_eq!(holders.len(), 1);
    assert!(holders[0].content.contains("Aşağıdaki koşullar aranır:"));
    assert!(holders[0].content.contains("2. LDL düzeyi"));
    assert!(!chunks.iter().any(|c| c.content.starts_with("2. LDL")));
}

#[test]
fn dates_and_amounts_do_not_open_sections() {
    let text = "4.2.28 - Ezetimib\n\
        Ezetimib uzman hekim raporu ile verilir.\n\
        15.03.2021 tarihinden itibaren rapor süresi 1 yıldır.\n\n\
        1.250.000 TL üzeri faturalar ayrıca incelenir.";
    let chunks = chunker(2048, 0, 0).index(&CorpusId::new("SUT"), text, "sut.txt");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].section.as_deref(), Some("4.2.28"));
    assert!(chunks[0].content.contains("15.03.2021 tarihinden"));
    assert!(chunks[0].content.contains("1.250.000 TL"));
}

#[test]
fn oversized_paragraph_splits_between_sentences() {
    let sentences = [
        "Birinci cümle 2.5 mg doz içerir.",
        "İkinci cümle tedavinin en az 3. basamakta uygulanacağını söyler.",
        "Üçüncü cümle rapor süresini belirtir!",
        "Dördüncü cümle bir soru sorar mı?",
        "Beşinci cümle paragrafı bitirir.",
    ];
    let text = format!("4.2.31 - Dozaj\n{}", sentences.join(" "));
    let chunks = chunker(90, 0, 0).index(&CorpusId::new("SUT"), &text, "sut.txt");
    assert!(chunks.len() > 1);
    for sentence in sentences {
        assert!(
            chunks.iter().any(|c| c.content.contains(sentence)),
            "sentence was split: {sentence}"
        );
    }
}

#[test]
fn sentence_splitter_keeps_ordinals_together() {
    assert_eq!(
        split_sentences("Tedavi 2. basamakta başlar. Sonra biter."),
        vec!["Tedavi 2. basamakta başlar.", "Sonra biter."]
    );
}

#[test]
fn following_chunk_repeats_tail_of_previous() {
    let p1 = "Birinci paragraf ilk parçanın tamamını dolduracak kadar uzun bir metindir burada.";
    let p2 = "İkinci paragraf ise yeni bir parçaya taşınan ve kendi içeriği olan bir metindir.";
    let text = format!("{p1}\n\n{p2}");
    let chunks = chunker(100, 0, 30).index(&CorpusId::new("SUT"), &text, "sut.txt");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].content, p1);
    let (overlap, rest) = chunks[1].content.split_once("\n\n").expect("overlap separator");
    assert!(!overlap.is_empty());
    assert!(overlap.chars().count() <= 30);
    assert!(p1.ends_with(overlap));
    assert!(!overlap.starts_with(' '));
    assert_eq!(rest, p2);
}

#[test]
fn small_trailing_chunk_merges_into_previous() {
    let long_a = "A".repeat(150);
    let long_b = "B".repeat(190);
    let text = format!("{long_a}\n\n{long_b}\n\nKısa kuyruk.");
    let chunks = chunker(200, 100, 0).index(&CorpusId::new("SUT"), &text, "sut.txt");
    assert_eq!(chunks.len(), 2);
    assert!(chunks[1].content.ends_with("Kısa kuyruk."));
    assert!(chunks.iter().all(|c| c.content.chars().count() >= 100));
}

#[test]
fn small_sections_are_not_merged_across() {
    let text = "4.2.40 - Bir\nKısa bölüm.\n\n4.2.41 - İki\nBaşka kısa bölüm.";
    let chunks = chunker(2048, 512, 256).index(&CorpusId::new("SUT"), text, "sut.txt");
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].section.as_deref(), Some("4.2.40"));
    assert_eq!(chunks[1].section.as_deref(), Some("4.2.41"));
}

#[test]
fn empty_or_unreadable_input_yields_no_chunks() {
    let c = chunker(2048, 512, 256);
    let corpus = CorpusId::new("SUT");
    assert!(c.index(&corpus, "", "a.txt").is_empty());
    assert!(c.index(&corpus, "  \n\n\t\n", "a.txt").is_empty());
    assert!(c.index(&corpus, "=== Sayfa 3 ===\n", "a.txt").is_empty());
    assert!(c.index_bytes(&corpus, &[0xff, 0xfe, 0x00, 0xc3], "a.bin").is_empty());
    assert!(c.try_index(&corpus, "", "a.txt").is_err());
}

#[test]
fn index_file_reads_from_disk() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("ek4d.txt");
    fs::write(&path, "20.00 - EK-4/D listesi\nGabapentin ile tedavi edilen hastalar.").unwrap();
    let chunks = chunker(2048, 512, 256).index_file(&CorpusId::new("EK-4/D"), &path);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].id, "ek_4_d:0000");
    assert_eq!(chunks[0].source_document, "ek4d.txt");
    assert!(chunks[0].has_entity("gabapentin"));

    let missing = chunker(2048, 512, 256).index_file(&CorpusId::new("EK-4/D"), &tmp.path().join("nope.txt"));
    assert!(missing.is_empty());
}

#[test]
fn metadata_tags_entities_codes_and_conditions() {
    let chunks = chunker(2048, 512, 256).index(&CorpusId::new("SUT"), SUT_SAMPLE, "sut.txt");
    let ezetimib = chunks.iter().find(|c| c.section.as_deref() == Some("4.2.28.C")).unwrap();
    assert!(ezetimib.entity_tags.contains("EZETIMIB"));
    assert!(ezetimib.entity_tags.contains("STATIN"));
    assert!(ezetimib.keywords.contains("e78"));
    assert!(ezetimib.keywords.contains("3ay"));
    assert!(ezetimib.has_conditions);

    let warfarin = chunks.iter().find(|c| c.section.as_deref() == Some("4.2.29")).unwrap();
    assert!(warfarin.has_entity("Warfarin"));
    assert!(warfarin.keywords.contains("18yaş"));
    assert!(!warfarin.has_entity("ezetimib"));

    let section_filter = MetadataFilter::Section("4.2.28".to_string());
    assert!(section_filter.matches(ezetimib));
    assert!(!section_filter.matches(warfarin));
    assert!(!MetadataFilter::Section("4.2.2".to_string()).matches(ezetimib));
    let combined = MetadataFilter::All(vec![
        MetadataFilter::EntityTag("ezetimib".to_string()),
        MetadataFilter::HasConditions(true),
    ]);
    assert!(combined.matches(ezetimib));
    assert!(!combined.matches(warfarin));
}

#[test]
fn suffix_rule_tags_unlisted_entities() {
    let chunks = chunker(2048, 0, 0).index(&CorpusId::new("EK-4/E"), "Denosumab ve kaptopril kullanımı.", "ek4e.txt");
    assert!(chunks[0].entity_tags.contains("DENOSUMAB"));
    assert!(chunks[0].entity_tags.contains("KAPTOPRIL"));
}
