mod enums {
    use crate::enums::*;

    #[test]
    fn sample_coding_new() {
        assert_eq!(SampleCoding::new(0x01).unwrap(), SampleCoding::Byte);
        assert_eq!(SampleCoding::new(0x02).unwrap(), SampleCoding::Short);
        assert_eq!(SampleCoding::new(0x04).unwrap(), SampleCoding::Int);
        assert_eq!(SampleCoding::new(0x14).unwrap(), SampleCoding::Float);
        assert!(SampleCoding::new(0x03).is_err());
        assert!(SampleCoding::new(0xFF).is_err());
    }

    #[test]
    fn sample_coding_datum_byte_length() {
        assert_eq!(SampleCoding::Byte.datum_byte_length(), 1);
        assert_eq!(SampleCoding::Short.datum_byte_length(), 2);
        assert_eq!(SampleCoding::Int.datum_byte_length(), 4);
        assert_eq!(SampleCoding::Float.datum_byte_length(), 4);
    }

    #[test]
    fn port_new() {
        assert_eq!(Port::new(0).unwrap(), Port::Echo);
        assert_eq!(Port::new(1).unwrap(), Port::CpaProgress);
        assert_eq!(Port::new(4).unwrap(), Port::ExtractTimingDebug);
        assert!(Port::new(5).is_err());
    }
}

mod bitconverter {
    use crate::bitconverter::*;
    use crate::enums::SampleCoding;

    #[test]
    fn decode_applies_yscale() {
        let raw: Vec<u8> = [10i16, -3, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let samples = decode_samples(&raw, 3, SampleCoding::Short, 0.5).unwrap();
        assert_eq!(samples, vec![5.0, -1.5, 0.0]);
    }

    #[test]
    fn encode_inverts_yscale() {
        let raw = encode_samples(&[5.0, -1.5, 0.0], SampleCoding::Short, 0.5);
        let back = decode_samples(&raw, 3, SampleCoding::Short, 0.5).unwrap();
        assert_eq!(back, vec![5.0, -1.5, 0.0]);
    }

    #[test]
    fn float_roundtrip_is_exact() {
        let vals = vec![1.25f32, -0.001, 1e20, 0.0];
        let raw = encode_samples(&vals, SampleCoding::Float, 1.0);
        let back = decode_samples(&raw, 4, SampleCoding::Float, 1.0).unwrap();
        assert_eq!(back, vals);
    }

    #[test]
    fn byte_coding_truncates() {
        let raw = encode_samples(&[3.9f32], SampleCoding::Byte, 1.0);
        let back = decode_samples(&raw, 1, SampleCoding::Byte, 1.0).unwrap();
        assert_eq!(back, vec![3.0]);
    }

    #[test]
    fn short_raw_buffer_is_an_error() {
        assert!(decode_samples(&[0u8; 3], 2, SampleCoding::Short, 1.0).is_err());
    }

    #[test]
    fn fit_title_pads_and_truncates() {
        assert_eq!(fit_title("ab", 4), vec![b'a', b'b', 0, 0]);
        assert_eq!(fit_title("abcdef", 4), vec![b'a', b'b', b'c', b'd']);
    }
}

mod header_structs {
    use crate::header_structs::*;
    use crate::enums::SampleCoding;
    use crate::{SetShape, UNKNOWN_NUM_TRACES};

    fn sample_shape() -> SetShape {
        SetShape::new(100, 10, 8, 0, SampleCoding::Float, 1.0)
    }

    #[test]
    fn write_then_parse_roundtrip() {
        let written = write_headers(&sample_shape(), &[]);
        let parsed = parse_headers(&written.bytes).unwrap();

        assert_eq!(parsed.shape.num_traces, 100);
        assert_eq!(parsed.shape.num_samples, 10);
        assert_eq!(parsed.shape.title_size, 8);
        assert_eq!(parsed.shape.data_size, 0);
        assert_eq!(parsed.shape.coding, SampleCoding::Float);
        assert_eq!(parsed.shape.yscale, 1.0);
        assert_eq!(parsed.trace_start, written.bytes.len());
    }

    #[test]
    fn num_traces_offset_patches_the_count() {
        let written = write_headers(&sample_shape(), &[]);
        let mut bytes = written.bytes.clone();
        bytes[written.num_traces_offset..written.num_traces_offset + 4]
            .copy_from_slice(&42u32.to_le_bytes());

        let parsed = parse_headers(&bytes).unwrap();
        assert_eq!(parsed.shape.num_traces, 42);
    }

    #[test]
    fn unknown_provisional_count_writes_zero() {
        let mut shape = sample_shape();
        shape.num_traces = UNKNOWN_NUM_TRACES;
        let written = write_headers(&shape, &[]);
        let parsed = parse_headers(&written.bytes).unwrap();
        assert_eq!(parsed.shape.num_traces, 0);
    }

    #[test]
    fn long_form_length_parses() {
        // DESCRIPTION with a 200-byte payload forces the 0x80 | n length form
        let mut bytes = Vec::new();
        bytes.push(HeaderTag::NumberTraces as u8);
        bytes.push(4);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.push(HeaderTag::NumberSamples as u8);
        bytes.push(4);
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.push(HeaderTag::SampleCoding as u8);
        bytes.push(1);
        bytes.push(0x14);
        bytes.push(HeaderTag::Description as u8);
        bytes.push(0x81);
        bytes.push(200);
        bytes.extend_from_slice(&[b'x'; 200]);
        bytes.push(HeaderTag::TraceBlock as u8);
        bytes.push(0);

        let parsed = parse_headers(&bytes).unwrap();
        assert_eq!(parsed.shape.num_traces, 7);
        assert_eq!(parsed.shape.num_samples, 3);
        assert!(matches!(
            &parsed.headers[3].value,
            HeaderValue::Str(s) if s.len() == 200
        ));
    }

    #[test]
    fn inherited_headers_survive_rewrite() {
        let extra = TraceHeader {
            tag: HeaderTag::Description as u8,
            value: HeaderValue::Str("acquired on scope 3".to_string()),
        };
        let written = write_headers(&sample_shape(), &[extra.clone()]);
        let parsed = parse_headers(&written.bytes).unwrap();

        assert!(parsed.headers.contains(&extra));
        // the terminator stays last
        assert_eq!(
            parsed.headers.last().unwrap().tag,
            HeaderTag::TraceBlock as u8
        );
    }

    #[test]
    fn dump_headers_names_every_tag() {
        let written = write_headers(&sample_shape(), &[]);
        let parsed = parse_headers(&written.bytes).unwrap();
        let dump = dump_headers(&parsed);

        assert!(dump.contains("Number of traces: 100"));
        assert!(dump.contains("Sample Coding: 20")); // 0x14
        assert!(dump.contains("Trace block marker"));
    }

    #[test]
    fn missing_required_header_is_decode_error() {
        // no SAMPLE_CODING
        let mut bytes = Vec::new();
        bytes.push(HeaderTag::NumberTraces as u8);
        bytes.push(4);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(HeaderTag::TraceBlock as u8);
        bytes.push(0);

        assert!(parse_headers(&bytes).is_err());
    }

    #[test]
    fn data_split_offsets_parse() {
        let mut shape = sample_shape();
        shape.data_size = 48;
        let extras = [
            TraceHeader { tag: HeaderTag::InputOffset as u8, value: HeaderValue::Int(0) },
            TraceHeader { tag: HeaderTag::InputLength as u8, value: HeaderValue::Int(16) },
            TraceHeader { tag: HeaderTag::KeyOffset as u8, value: HeaderValue::Int(32) },
            TraceHeader { tag: HeaderTag::KeyLength as u8, value: HeaderValue::Int(16) },
        ];
        let written = write_headers(&shape, &extras);
        let parsed = parse_headers(&written.bytes).unwrap();

        assert_eq!(parsed.shape.input, Some((0, 16)));
        assert_eq!(parsed.shape.key, Some((32, 16)));
        assert_eq!(parsed.shape.output, None);
    }
}
