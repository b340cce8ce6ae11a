use dwconv_hlo::prelude::*;
use dwconv_hlo::transform::get_transform;

const DILATED: &str = r#"
    HloModule TensorFlowDepthwiseConv

    ENTRY main {
      activation = bf16[256,5,5,256]{3,0,2,1} parameter(0)
      kernel = bf16[3,3,1,256]{3,2,1,0} parameter(1)
      ROOT conv = bf16[256,8,3,256]{3,0,2,1} convolution(bf16[256,5,5,256]{3,0,2,1} activation, bf16[3,3,1,256]{3,2,1,0} kernel),
          window={size=3x3 stride=4x1 pad=0_0x0_0 lhs_dilate=8x1},
          dim_labels=b01f_01io->b01f, feature_group_count=256
    }
    "#;

const OUTER_DIM: &str = r#"
    HloModule TensorFlowDepthwiseConv

    ENTRY main {
      activation = f32[144,1,1,128]{3,0,2,1} parameter(0)
      kernel = f32[2,2,1,128]{3,2,1,0} parameter(1)
      ROOT conv = f32[144,2,3,128]{0,3,2,1} convolution(f32[144,1,1,128]{3,0,2,1} activation, f32[2,2,1,128]{3,2,1,0} kernel),
          window={size=2x2  pad=1_1x2_2 rhs_dilate=1x2}, dim_labels=b01f_01io->b01f,
          feature_group_count=128
    }
    "#;

const PLAIN: &str = r#"
      HloModule TensorFlowDepthwiseConv

      ENTRY main {
        activation = f32[8,48,48,8]{0,3,2,1} parameter(0)
        kernel = f32[17,17,1,8]{3,2,1,0} parameter(1)
        ROOT conv = f32[8,32,32,8]{3,0,2,1} convolution(f32[8,48,48,8]{0,3,2,1} activation, f32[17,17,1,8]{3,2,1,0} kernel),
            window={size=17x17}, dim_labels=b01f_01io->b01f,
            feature_group_count=8
      }
      "#;

fn conv(module: &HloModule) -> &Convolution {
    match &module.root().unwrap().op {
        Op::Convolution(conv) => conv,
        op => panic!("expected a convolution, got {op:?}"),
    }
}

#[test]
fn dilated_template() {
    let module = parse_module(DILATED).unwrap();
    assert_eq!(module.name, "TensorFlowDepthwiseConv");
    assert_eq!(module.entry_name, "main");
    let conv = conv(&module);
    assert_eq!(conv.feature_group_count, 256);
    assert_eq!(conv.window.to_string(), "size=3x3 stride=4x1 lhs_dilate=8x1");
    assert_eq!(conv.dim_labels.input_spatial.as_slice(), &[1, 2]);
    assert_eq!(module.parameter_shapes()[0].element_type, PrimitiveType::BF16);
}

#[test]
fn outer_dim_template() {
    let module = parse_module(OUTER_DIM).unwrap();
    let window = &conv(&module).window;
    assert_eq!((window.dims[0].padding_low, window.dims[1].padding_high), (1, 2));
    assert_eq!(window.dims[1].rhs_dilation, 2);
    assert_eq!(module.root().unwrap().shape.to_string(), "f32[144,2,3,128]{0,3,2,1}");
}

#[test]
fn plain_template() {
    let module = parse_module(PLAIN).unwrap();
    assert_eq!(module.parameters().len(), 2);
    assert_eq!(conv(&module).window.to_string(), "size=17x17");
}

#[test]
fn canonical_text_reparses() {
    for text in [DILATED, OUTER_DIM, PLAIN] {
        let module = parse_module(text).unwrap();
        assert_eq!(parse_module(&module.to_string()).unwrap(), module);
    }
}

#[test]
fn wrong_declared_shape_is_rejected() {
    let text = PLAIN.replace("= f32[8,32,32,8]", "= f32[8,31,32,8]");
    let err = parse_module(&text).unwrap_err();
    assert!(format!("{err:?}").contains("operands imply [8,32,32,8]"));
}

#[test]
fn mismatched_operand_annotation_is_rejected() {
    let text = PLAIN.replace("{3,2,1,0} kernel)", "{0,1,2,3} kernel)");
    assert!(parse_module(&text).is_err());
}

#[test]
fn reference_transforms() {
    let module = parse_module(DILATED).unwrap();
    let module = get_transform("bf16-mixed-precision-removal")
        .unwrap()
        .transform_into(&module)
        .unwrap();
    let module = get_transform("despecializer").unwrap().transform_into(&module).unwrap();
    let text = module.to_string();
    assert!(!text.contains("bf16"));
    assert!(text.contains("f32[256,8,3,256]{3,2,1,0}"));
    assert_eq!(parse_module(&text).unwrap(), module);
}
