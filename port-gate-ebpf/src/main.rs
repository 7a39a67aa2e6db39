#![no_std]
#![no_main]

mod maps;

use aya_ebpf::bindings::xdp_action;
use aya_ebpf::macros::{cgroup_sock_addr, xdp};
use aya_ebpf::programs::{SockAddrContext, XdpContext};
use aya_log_ebpf::debug;
use port_gate_common::{
    PacketDecision, PacketGate, PacketView, SocketGate, SocketHook, SocketRequest, SocketVerdict,
};

use crate::maps::{socket_scope, KernelCounters, KernelPolicy};

#[xdp]
pub fn port_gate_xdp(ctx: XdpContext) -> u32 {
    // SAFETY: data..data_end is the frame being classified and stays valid
    // until this program returns.
    let view = unsafe { PacketView::from_raw(ctx.data(), ctx.data_end()) };
    let gate = PacketGate::new(KernelPolicy, KernelCounters);
    match gate.inspect(view) {
        PacketDecision::Drop(ports) => {
            debug!(&ctx, "drop tcp {} -> {}", ports.source, ports.dest);
            xdp_action::XDP_DROP
        }
        PacketDecision::Pass(_) => xdp_action::XDP_PASS,
    }
}

#[cgroup_sock_addr(connect4)]
pub fn port_gate_connect4(ctx: SockAddrContext) -> i32 {
    gate_socket(&ctx, SocketHook::Connect)
}

#[cgroup_sock_addr(bind4)]
pub fn port_gate_bind4(ctx: SockAddrContext) -> i32 {
    gate_socket(&ctx, SocketHook::Bind)
}

#[cgroup_sock_addr(connect6)]
pub fn port_gate_connect6(ctx: SockAddrContext) -> i32 {
    gate_socket(&ctx, SocketHook::Connect)
}

#[cgroup_sock_addr(bind6)]
pub fn port_gate_bind6(ctx: SockAddrContext) -> i32 {
    gate_socket(&ctx, SocketHook::Bind)
}

#[inline(always)]
fn gate_socket(ctx: &SockAddrContext, hook: SocketHook) -> i32 {
    // SAFETY: `sock_addr` is the context pointer handed to the program.
    let (protocol, user_port) = unsafe { ((*ctx.sock_addr).protocol, (*ctx.sock_addr).user_port) };
    let req = SocketRequest::from_sock_addr(hook, protocol, user_port);

    let gate = SocketGate::new(KernelPolicy, socket_scope());
    let verdict = gate.evaluate(&req);
    if verdict == SocketVerdict::Deny {
        debug!(
            ctx,
            "deny {} port {} proto {}",
            req.hook.name(),
            req.port,
            req.protocol
        );
    }
    verdict.code()
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
